use std::ops::Range;

use duckdb::{params, Appender, Connection};
use tracing::info;

use crate::db::loader::{batch_insert, TableRow};
use crate::db::schema;
use crate::error::Result;
use crate::network::state_dict::{LayerParams, StateDict};

/// One row of the `node` table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub id: i64,
    pub bias: f64,
    pub name: String,
    pub model_id: i64,
}

/// One row of the `edge` table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeRow {
    pub src: i64,
    pub dst: i64,
    pub weight: f64,
    pub model_id: i64,
}

impl TableRow for NodeRow {
    fn append_to(&self, appender: &mut Appender<'_>) -> duckdb::Result<()> {
        appender.append_row(params![self.id, self.bias, self.name, self.model_id])
    }
}

impl TableRow for EdgeRow {
    fn append_to(&self, appender: &mut Appender<'_>) -> duckdb::Result<()> {
        appender.append_row(params![self.src, self.dst, self.weight, self.model_id])
    }
}

/// The relational form of one model, produced lazily.
///
/// Node ids are assigned layer by layer in emission order, starting at
/// `first_id`, so id order is topological order. Edges connect every node of
/// a layer to every node of the next one; the weight of `from → to` is the
/// tensor entry `[to][from]` because weight tensors are stored `[out][in]`.
pub struct ModelEncoding<'a> {
    layers: Vec<LayerParams<'a>>,
    widths: Vec<usize>,
    offsets: Vec<i64>,
    model_id: i64,
}

impl<'a> ModelEncoding<'a> {
    /// Validates `state_dict` and plans the id layout. No row is produced
    /// before the whole parameter sequence has been checked.
    pub fn new(state_dict: &'a StateDict, first_id: i64, model_id: i64) -> Result<Self> {
        let layers = state_dict.layers()?;
        let mut widths = vec![layers[0].input_size()];
        widths.extend(layers.iter().map(LayerParams::output_size));

        let offsets = widths
            .iter()
            .scan(first_id, |next, &width| {
                let offset = *next;
                *next += width as i64;
                Some(offset)
            })
            .collect();

        Ok(ModelEncoding { layers, widths, offsets, model_id })
    }

    pub fn model_id(&self) -> i64 {
        self.model_id
    }

    /// Node count per layer, input layer first.
    pub fn layer_widths(&self) -> &[usize] {
        &self.widths
    }

    pub fn node_count(&self) -> usize {
        self.widths.iter().sum()
    }

    pub fn edge_count(&self) -> usize {
        self.widths.windows(2).map(|w| w[0] * w[1]).sum()
    }

    /// Ids of the nodes in `layer` (0 = input layer).
    pub fn layer_node_ids(&self, layer: usize) -> Range<i64> {
        let start = self.offsets[layer];
        start..start + self.widths[layer] as i64
    }

    /// Input nodes (`input.<i>`, bias 0) followed by one node per bias value
    /// (`<bias-name>.<i>`) in parameter order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeRow> + '_ {
        let model_id = self.model_id;
        let inputs = self.layer_node_ids(0).enumerate().map(move |(i, id)| NodeRow {
            id,
            bias: 0.0,
            name: format!("input.{i}"),
            model_id,
        });
        let rest = self.layers.iter().enumerate().flat_map(move |(k, layer)| {
            self.layer_node_ids(k + 1)
                .zip(layer.biases.iter().enumerate())
                .map(move |(id, (i, &bias))| NodeRow {
                    id,
                    bias,
                    name: format!("{}.{i}", layer.bias_name),
                    model_id,
                })
        });
        inputs.chain(rest)
    }

    /// Edges of every layer boundary, source-major.
    pub fn edges(&self) -> impl Iterator<Item = EdgeRow> + '_ {
        let model_id = self.model_id;
        self.layers.iter().enumerate().flat_map(move |(k, layer)| {
            let to_ids = self.layer_node_ids(k + 1);
            self.layer_node_ids(k).enumerate().flat_map(move |(from_index, src)| {
                to_ids.clone().enumerate().map(move |(to_index, dst)| EdgeRow {
                    src,
                    dst,
                    weight: layer.weights[to_index][from_index],
                    model_id,
                })
            })
        })
    }
}

/// Summary of one encoded model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedModel {
    pub model_id: i64,
    pub name: String,
    pub first_node_id: i64,
    pub layer_widths: Vec<usize>,
    pub nodes: usize,
    pub edges: usize,
}

/// Registers `name` as a new model and loads its nodes and edges into the
/// current schema. Earlier models in the database are left untouched.
pub fn encode_model(conn: &Connection, name: &str, state_dict: &StateDict, batch_size: usize) -> Result<EncodedModel> {
    // Validate before touching the database.
    let node_count: usize = state_dict.layer_widths()?.iter().sum();

    let model_id = schema::next_model_id(conn)?;
    conn.execute("INSERT INTO model (id, name) VALUES (?, ?)", params![model_id, name])?;
    let first_node_id = schema::reserve_node_ids(conn, node_count)?;

    let encoding = ModelEncoding::new(state_dict, first_node_id, model_id)?;
    let nodes = batch_insert(conn, "node", encoding.nodes(), batch_size)?;
    let edges = batch_insert(conn, "edge", encoding.edges(), batch_size)?;

    info!(model_id, name, nodes, edges, widths = ?encoding.layer_widths(), "encoded model");
    Ok(EncodedModel {
        model_id,
        name: name.to_string(),
        first_node_id,
        layer_widths: encoding.layer_widths().to_vec(),
        nodes,
        edges,
    })
}

/// Recreates the schema and encodes a single model.
pub fn load_state_dict(conn: &Connection, name: &str, state_dict: &StateDict, batch_size: usize) -> Result<EncodedModel> {
    state_dict.layers()?;
    schema::initialize(conn)?;
    encode_model(conn, name, state_dict, batch_size)
}

/// Recreates the schema and encodes every model under its own `model_id`,
/// in the given order.
pub fn load_models(conn: &Connection, models: &[(String, StateDict)], batch_size: usize) -> Result<Vec<EncodedModel>> {
    for (_, state_dict) in models {
        state_dict.layers()?;
    }
    schema::initialize(conn)?;
    models
        .iter()
        .map(|(name, state_dict)| encode_model(conn, name, state_dict, batch_size))
        .collect()
}
