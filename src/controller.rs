//! Controller synthesis (§4.E): reconstructs the unprojected affine feedback
//! law from the backward pass's projected `(K̃, ℓ̃)` and the per-node
//! change-of-variables terms `(P_N, P_x, u_0)`.

use nalgebra::{DMatrix, DVector};

use crate::model::{Controller, PrimalSolution, RiccatiModification, RiccatiStepResult};

/// Per-node synthesis output before collapsing into a [`Controller`]: keeps
/// the nominal feed-forward and the increment separate so a search strategy
/// can scale the increment by a trial step size (§4.F).
pub struct SynthesizedController {
    pub times: Vec<f64>,
    pub nominal_states: Vec<DVector<f64>>,
    pub nominal_bias: Vec<DVector<f64>>,
    pub delta_bias: Vec<DVector<f64>>,
    pub gain: Vec<DMatrix<f64>>,
}

impl SynthesizedController {
    /// Collapse into a feedback [`Controller`] with feed-forward
    /// `bias_k + alpha * delta_bias_k`.
    pub fn to_controller(&self, alpha: f64) -> Controller {
        let bias = self
            .nominal_bias
            .iter()
            .zip(&self.delta_bias)
            .map(|(b, db)| b + db * alpha)
            .collect();
        Controller::Linear {
            times: self.times.clone(),
            nominal_states: self.nominal_states.clone(),
            bias,
            gain: self.gain.clone(),
        }
    }
}

/// Build the unprojected controller for every interior node (§4.E).
/// `event`/terminal nodes carry no entry in `riccati_results`; their
/// position in the output is filled by the last-node copy rule or left as
/// an identically-zero feedforward for event nodes (no control input).
pub fn synthesize(
    primal: &PrimalSolution,
    modifications: &[Option<RiccatiModification>],
    riccati_results: &[Option<RiccatiStepResult>],
    p_x: &[DMatrix<f64>],
    u_0: &[DVector<f64>],
) -> SynthesizedController {
    let n = primal.len();
    let nx = primal.states.first().map(|x| x.len()).unwrap_or(0);
    let mut gain = Vec::with_capacity(n);
    let mut nominal_bias = Vec::with_capacity(n);
    let mut delta_bias = Vec::with_capacity(n);

    for k in 0..n {
        let is_event = primal.is_post_event(k.saturating_add(1)) && k + 1 < n;
        let nominal_u = primal
            .inputs
            .get(k)
            .cloned()
            .unwrap_or_else(|| DVector::zeros(0));

        match (&riccati_results[k], &modifications[k]) {
            (Some(result), Some(modification)) if !is_event => {
                let p_n = &modification.constraint_null_projector;
                gain.push(p_n * &result.gain_tilde + &p_x[k]);
                delta_bias.push(p_n * &result.bias_tilde + &u_0[k]);
                nominal_bias.push(nominal_u);
            }
            _ => {
                // Event or terminal node: no control input synthesised here.
                gain.push(DMatrix::zeros(nominal_u.len().max(1), nx));
                delta_bias.push(DVector::zeros(nominal_u.len()));
                nominal_bias.push(nominal_u);
            }
        }
    }

    // §4.E: the last node's controller is a copy of the second-to-last when
    // the final sample is not itself an event.
    if n >= 2 && !primal.is_post_event(n - 1) {
        gain[n - 1] = gain[n - 2].clone();
        delta_bias[n - 1] = delta_bias[n - 2].clone();
    }

    SynthesizedController {
        times: primal.times.clone(),
        nominal_states: primal.states.clone(),
        nominal_bias,
        delta_bias,
        gain,
    }
}

/// Pure feed-forward reconstruction used by `getPrimalSolution` when
/// `useFeedbackPolicy` is false (§6).
pub fn feedforward_only(primal: &PrimalSolution) -> Controller {
    Controller::Feedforward {
        times: primal.times.clone(),
        bias: primal.inputs.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModeSchedule;
    use nalgebra::dvector;

    #[test]
    fn last_node_copies_second_to_last_when_not_event() {
        let primal = PrimalSolution {
            times: vec![0.0, 1.0, 2.0],
            states: vec![dvector![0.0], dvector![0.0], dvector![0.0]],
            inputs: vec![dvector![0.0], dvector![0.0], dvector![0.0]],
            post_event_indices: vec![],
            mode_schedule: ModeSchedule::new(vec![], vec![0]),
            controller: None,
        };
        let modifications = vec![None, None, None];
        let riccati_results = vec![None, None, None];
        let p_x = vec![DMatrix::zeros(1, 1); 3];
        let u_0 = vec![DVector::zeros(1); 3];
        let synthesized = synthesize(&primal, &modifications, &riccati_results, &p_x, &u_0);
        assert_eq!(synthesized.gain[2], synthesized.gain[1]);
    }
}
