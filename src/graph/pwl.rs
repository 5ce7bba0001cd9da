use serde::{Serialize, Deserialize};

use crate::error::{RelunetError, Result};
use crate::graph::graph::NetworkGraph;

/// A point where the network's output function changes slope, with the
/// function value there and the slope up to the next breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub x: f64,
    pub y: f64,
    pub slope: f64,
}

/// Piecewise-linear function described by its breakpoints, sorted by `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseLinear {
    points: Vec<Breakpoint>,
}

impl PiecewiseLinear {
    pub fn new(mut points: Vec<Breakpoint>) -> PiecewiseLinear {
        points.sort_by(|a, b| a.x.total_cmp(&b.x));
        PiecewiseLinear { points }
    }

    pub fn points(&self) -> &[Breakpoint] {
        &self.points
    }

    /// Rebuilds the curve from the first point's value and the slopes alone:
    /// `y_{k+1} = y_k + slope_k * (x_{k+1} - x_k)`.
    pub fn reconstruct(&self) -> Vec<(f64, f64)> {
        let mut out = Vec::with_capacity(self.points.len());
        let Some(first) = self.points.first() else { return out };
        out.push((first.x, first.y));
        for pair in self.points.windows(2) {
            let (prev_x, prev_y) = out[out.len() - 1];
            out.push((pair[1].x, prev_y + pair[0].slope * (pair[1].x - prev_x)));
        }
        out
    }

    /// Function value for `x` between the first and last breakpoint.
    pub fn value_at(&self, x: f64) -> Option<f64> {
        let (first, last) = (self.points.first()?, self.points.last()?);
        if x < first.x || x > last.x {
            return None;
        }
        let k = self.points.partition_point(|p| p.x <= x).saturating_sub(1);
        let p = &self.points[k];
        Some(p.y + p.slope * (x - p.x))
    }

    /// Trapezoidal integral over `[from, to]`, restricted to the segments
    /// between consecutive breakpoints. Segments straddling a bound are
    /// clipped to it. Returns `None` when no segment overlaps the bounds.
    pub fn integral(&self, from: f64, to: f64) -> Option<f64> {
        let mut total = None;
        for pair in self.points.windows(2) {
            let (p, next_x) = (&pair[0], pair[1].x);
            let (lo, hi) = (p.x.max(from), next_x.min(to));
            if hi <= lo {
                continue;
            }
            let y_lo = p.y + p.slope * (lo - p.x);
            let y_hi = p.y + p.slope * (hi - p.x);
            *total.get_or_insert(0.0) += (y_lo + y_hi) / 2.0 * (hi - lo);
        }
        total
    }
}

/// Breakpoints of a single-hidden-layer network with one input and one
/// output, computed from the graph without SQL.
///
/// Hidden unit `j` with input weight `w_j != 0` and bias `b_j` switches at
/// `x = -b_j / w_j`; units sharing a switch point yield one breakpoint.
pub fn extract_breakpoints(graph: &NetworkGraph) -> Result<Vec<Breakpoint>> {
    let (inputs, outputs) = (graph.input_nodes(), graph.output_nodes());
    let layers = graph.layers();
    if inputs.len() != 1 || outputs.len() != 1 || layers.len() != 3 {
        return Err(RelunetError::precondition(
            "breakpoints need one input, one hidden layer and one output",
        ));
    }

    let output_bias = graph.node(outputs[0]).map_or(0.0, |n| n.bias);
    let hidden: Vec<(f64, f64, f64)> = graph
        .successors(inputs[0])
        .into_iter()
        .map(|(id, w_in)| {
            let bias = graph.node(id).map_or(0.0, |n| n.bias);
            let w_out = graph.successors(id).first().map_or(0.0, |&(_, w)| w);
            (w_in, bias, w_out)
        })
        .collect();

    let mut xs: Vec<f64> = hidden
        .iter()
        .filter(|(w_in, _, _)| *w_in != 0.0)
        .map(|&(w_in, bias, _)| -bias / w_in)
        .collect();
    xs.sort_by(f64::total_cmp);
    xs.dedup();

    Ok(xs
        .into_iter()
        .map(|x| {
            let y = output_bias
                + hidden.iter().map(|&(w_in, b, w_out)| w_out * (w_in * x + b).max(0.0)).sum::<f64>();
            let slope = hidden
                .iter()
                .filter(|&&(w_in, b, _)| {
                    (w_in > 0.0 && -b / w_in <= x) || (w_in < 0.0 && -b / w_in > x)
                })
                .map(|&(w_in, _, w_out)| w_out * w_in)
                .sum();
            Breakpoint { x, y, slope }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::state_dict::StateDict;

    /// |x| = relu(x) + relu(-x), plus a constant unit that never switches.
    fn abs_network() -> StateDict {
        let mut sd = StateDict::new();
        sd.push_layer("fc1", vec![vec![1.0], vec![-1.0], vec![0.0], vec![2.0]], vec![0.0, 0.0, 1.0, -2.0]);
        sd.push_layer("fc2", vec![vec![1.0, 1.0, 0.5, 0.0]], vec![0.25]);
        sd
    }

    #[test]
    fn shared_switch_points_collapse() {
        let g = NetworkGraph::from_state_dict(&abs_network()).unwrap();
        let bps = extract_breakpoints(&g).unwrap();
        let xs: Vec<f64> = bps.iter().map(|b| b.x).collect();
        // x = 0 (twice) and x = 1 from the last unit.
        assert_eq!(xs, vec![0.0, 1.0]);
        assert_eq!(bps[0].y, 0.75);
        assert_eq!(bps[0].slope, 1.0);
    }

    #[test]
    fn reconstruction_matches_direct_evaluation() {
        let sd = abs_network();
        let g = NetworkGraph::from_state_dict(&sd).unwrap();
        let pwl = PiecewiseLinear::new(extract_breakpoints(&g).unwrap());
        for (x, y) in pwl.reconstruct() {
            let direct = g.forward(&[x]).unwrap()[0].1;
            assert!((direct - y).abs() < 1e-12, "x = {x}");
        }
    }

    #[test]
    fn integral_is_clipped_to_bounds() {
        let pwl = PiecewiseLinear::new(vec![
            Breakpoint { x: 0.0, y: 0.0, slope: 1.0 },
            Breakpoint { x: 2.0, y: 2.0, slope: -1.0 },
            Breakpoint { x: 4.0, y: 0.0, slope: 0.0 },
        ]);
        assert_eq!(pwl.integral(0.0, 4.0), Some(4.0));
        assert_eq!(pwl.integral(1.0, 2.0), Some(1.5));
        assert_eq!(pwl.integral(5.0, 6.0), None);
        assert_eq!(pwl.value_at(3.0), Some(1.0));
        assert_eq!(pwl.value_at(-1.0), None);
    }
}
