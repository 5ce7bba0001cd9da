use duckdb::Connection;
use relunet_sql::db::schema;
use relunet_sql::graph::{extract_breakpoints, PiecewiseLinear};
use relunet_sql::{load_state_dict, Analyzer, Evaluator, Network, NetworkGraph, NetworkSpec, QuerySuite, StateDict};

fn loaded(state_dict: &StateDict) -> Connection {
    let conn = schema::open_in_memory().unwrap();
    load_state_dict(&conn, "model", state_dict, 1024).unwrap();
    conn
}

fn column<T: duckdb::types::FromSql>(conn: &Connection, sql: &str) -> Vec<T> {
    let mut stmt = conn.prepare(sql).unwrap();
    let rows = stmt.query_map([], |row| row.get(0)).unwrap();
    rows.collect::<duckdb::Result<_>>().unwrap()
}

#[test]
fn difference_network_outputs_zero_for_equal_inputs() {
    let mut sd = StateDict::new();
    sd.push_layer("fc", vec![vec![1.0, -1.0]], vec![0.0]);
    let conn = loaded(&sd);
    let suite = QuerySuite::builtin();

    let eval = Evaluator::new(&conn, &suite).evaluate(&[1.0, 1.0]).unwrap();
    assert_eq!(eval.outputs(0), vec![0.0]);
}

#[test]
fn sql_forward_pass_matches_dense_and_graph() {
    let suite = QuerySuite::builtin();
    let specs = [
        NetworkSpec { input_size: 3, hidden_size: 5, num_hidden_layers: 2, output_size: 4 },
        NetworkSpec { input_size: 1, hidden_size: 4, num_hidden_layers: 10, output_size: 1 },
        NetworkSpec { input_size: 6, hidden_size: 8, num_hidden_layers: 1, output_size: 10 },
    ];

    for spec in specs {
        let network = spec.build();
        let sd = network.to_state_dict();
        let conn = loaded(&sd);
        let graph = NetworkGraph::from_state_dict(&sd).unwrap();

        let samples: Vec<Vec<f64>> =
            (0..3).map(|s| (0..spec.input_size).map(|i| (s * 7 + i) as f64 * 0.37 - 1.0).collect()).collect();
        let eval = Evaluator::new(&conn, &suite).evaluate_batch(&samples).unwrap();

        for (s, sample) in samples.iter().enumerate() {
            let dense = network.forward(sample).unwrap();
            let sql = eval.outputs(s as i64);
            let reference: Vec<f64> = graph.forward(sample).unwrap().into_iter().map(|(_, v)| v).collect();
            assert_eq!(sql.len(), dense.len());
            for ((a, b), c) in sql.iter().zip(&dense).zip(&reference) {
                assert!((a - b).abs() < 1e-5, "{spec:?}: sql {a} vs dense {b}");
                assert!((c - b).abs() < 1e-9, "{spec:?}: graph {c} vs dense {b}");
            }
        }
    }
}

#[test]
fn encoding_twice_gives_identical_tables() {
    let sd = NetworkSpec { input_size: 2, hidden_size: 3, num_hidden_layers: 3, output_size: 2 }.build().to_state_dict();
    let suite = QuerySuite::builtin();
    let (a, b) = (loaded(&sd), loaded(&sd));

    assert_eq!(
        Analyzer::new(&a, &suite).layer_counts().unwrap(),
        Analyzer::new(&b, &suite).layer_counts().unwrap()
    );
    let biases = "SELECT bias FROM node ORDER BY id";
    let weights = "SELECT weight FROM edge ORDER BY src, dst";
    assert_eq!(column::<f64>(&a, biases), column::<f64>(&b, biases));
    assert_eq!(column::<f64>(&a, weights), column::<f64>(&b, weights));
}

#[test]
fn layer_and_parameter_counts_follow_the_architecture() {
    let spec = NetworkSpec { input_size: 4, hidden_size: 6, num_hidden_layers: 3, output_size: 2 };
    let sd = spec.build().to_state_dict();
    let conn = loaded(&sd);
    let suite = QuerySuite::builtin();
    let analyzer = Analyzer::new(&conn, &suite);

    let layers = analyzer.layer_counts().unwrap();
    assert_eq!(layers.len(), spec.num_hidden_layers + 2);
    let widths: Vec<usize> = layers.iter().map(|l| l.nodes as usize).collect();
    assert_eq!(widths, spec.layer_sizes());
    assert_eq!(analyzer.parameter_count().unwrap() as usize, sd.parameter_count().unwrap());
}

#[test]
fn pruning_extremes() {
    let sd = NetworkSpec { input_size: 2, hidden_size: 3, num_hidden_layers: 2, output_size: 2 }.build().to_state_dict();
    let conn = loaded(&sd);
    let suite = QuerySuite::builtin();
    let analyzer = Analyzer::new(&conn, &suite);

    // He-initialised weights are never exactly zero.
    assert!(analyzer.pruning_candidates(0.0).unwrap().is_empty());
    let non_output: Vec<i64> = column(&conn, "SELECT DISTINCT src FROM edge ORDER BY src");
    assert_eq!(analyzer.pruning_candidates(f64::INFINITY).unwrap(), non_output);

    let report = analyzer.pruning_report(f64::INFINITY).unwrap();
    assert_eq!(report[0].hidden_nodes, 6);
    assert_eq!(report[0].prunable_nodes, 6);
    assert_eq!(report[0].percentage_prunable, Some(100.0));
}

/// One input, `hidden` ReLU units with distinct switch points, one output.
fn one_dimensional(hidden: usize) -> StateDict {
    let mut sd = StateDict::new();
    let w_in = (0..hidden).map(|j| vec![(j as f64 - 5.5) * 0.3]).collect();
    let b_in = (0..hidden).map(|j| 0.1 * j as f64 + 0.05).collect();
    let w_out = (0..hidden).map(|j| if j % 2 == 0 { 0.8 } else { -0.6 }).collect();
    sd.push_layer("fc1", w_in, b_in);
    sd.push_layer("fc2", vec![w_out], vec![0.3]);
    sd
}

#[test]
fn breakpoints_reconstruct_the_network() {
    let sd = one_dimensional(12);
    let network = Network::from_state_dict(&sd).unwrap();
    let conn = loaded(&sd);
    let suite = QuerySuite::builtin();
    let analyzer = Analyzer::new(&conn, &suite);

    let points = analyzer.breakpoints().unwrap();
    assert_eq!(points.len(), 12);
    assert!(points.windows(2).all(|w| w[0].x < w[1].x));
    assert_eq!(points.len(), extract_breakpoints(&NetworkGraph::from_state_dict(&sd).unwrap()).unwrap().len());

    let pwl = PiecewiseLinear::new(points);
    for (x, y) in pwl.reconstruct() {
        let direct = network.forward(&[x]).unwrap()[0];
        assert!((direct - y).abs() < 1e-9, "x = {x}: {direct} vs {y}");
    }

    let (first, last) = (pwl.points()[0].x, pwl.points()[11].x);
    let sql = analyzer.integral(first, last).unwrap().unwrap();
    let rust = pwl.integral(first, last).unwrap();
    assert!((sql - rust).abs() < 1e-9);
    // Bounds beyond the outer breakpoints are clipped to them.
    assert!((analyzer.integral(first - 10.0, last + 10.0).unwrap().unwrap() - sql).abs() < 1e-9);
}

#[test]
fn exported_database_evaluates_the_same() {
    let sd = NetworkSpec { input_size: 3, hidden_size: 4, num_hidden_layers: 2, output_size: 3 }.build().to_state_dict();
    let conn = loaded(&sd);
    let suite = QuerySuite::builtin();
    let sample = [0.2, -0.4, 0.9];
    let before = Evaluator::new(&conn, &suite).evaluate(&sample).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("db");
    schema::export_database(&conn, &export).unwrap();
    // A second export replaces the first.
    schema::export_database(&conn, &export).unwrap();

    let imported = schema::import_database(&export).unwrap();
    assert_eq!(schema::table_counts(&imported).unwrap(), schema::table_counts(&conn).unwrap());
    let after = Evaluator::new(&imported, &suite).evaluate(&sample).unwrap();
    assert_eq!(before.predictions, after.predictions);
    for (a, b) in before.rows.iter().zip(&after.rows) {
        assert_eq!((a.node_id, &a.name), (b.node_id, &b.name));
        assert!((a.output_value - b.output_value).abs() < 1e-12);
    }
}
