use ndarray::Array2;

use crate::model::RecurrentModel;

/// Recurrent state carried between forward calls. The nesting mirrors the
/// model (per layer, and per expert for the ensemble's last layer); callers
/// outside the model treat it as opaque.
#[derive(Debug, Clone, PartialEq)]
pub enum HiddenState {
    /// `h` and `c` of one LSTM layer, each `[batch, hidden]`.
    Layer { h: Array2<f32>, c: Array2<f32> },
    Group(Vec<HiddenState>),
}

impl HiddenState {
    pub fn zeros(batch_width: usize, hidden: usize) -> Self {
        HiddenState::Layer {
            h: Array2::zeros((batch_width, hidden)),
            c: Array2::zeros((batch_width, hidden)),
        }
    }

    /// Same values, rebuilt as fresh contiguous buffers that share nothing
    /// with the forward pass that produced them.
    pub fn detach(self) -> Self {
        match self {
            HiddenState::Layer { h, c } => HiddenState::Layer {
                h: h.as_standard_layout().into_owned(),
                c: c.as_standard_layout().into_owned(),
            },
            HiddenState::Group(items) => {
                HiddenState::Group(items.into_iter().map(HiddenState::detach).collect())
            }
        }
    }

    /// Number of `Layer` leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            HiddenState::Layer { .. } => 1,
            HiddenState::Group(items) => items.iter().map(HiddenState::leaf_count).sum(),
        }
    }
}

/// Creates fresh state for a sentence and repackages state between forward
/// calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateManager;

impl StateManager {
    pub fn init<M: RecurrentModel + ?Sized>(&self, model: &M, batch_width: usize) -> HiddenState {
        model.init_hidden(batch_width)
    }

    pub fn detach(&self, state: HiddenState) -> HiddenState {
        state.detach()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_detach_keeps_values_and_structure() {
        let transposed = arr2(&[[1.0f32, 2.0], [3.0, 4.0]]).reversed_axes();
        let state = HiddenState::Group(vec![
            HiddenState::zeros(2, 3),
            HiddenState::Group(vec![
                HiddenState::Layer { h: transposed.clone(), c: transposed.clone() },
                HiddenState::zeros(2, 2),
            ]),
        ]);

        let detached = StateManager.detach(state.clone());
        assert_eq!(detached, state);
        assert_eq!(detached.leaf_count(), 3);

        if let HiddenState::Group(outer) = &detached {
            if let HiddenState::Group(inner) = &outer[1] {
                if let HiddenState::Layer { h, .. } = &inner[0] {
                    assert!(h.is_standard_layout());
                    return;
                }
            }
        }
        panic!("unexpected state structure after detach");
    }

    #[test]
    fn test_zeros_shape() {
        match HiddenState::zeros(4, 7) {
            HiddenState::Layer { h, c } => {
                assert_eq!(h.dim(), (4, 7));
                assert_eq!(c.dim(), (4, 7));
                assert!(h.iter().chain(c.iter()).all(|&x| x == 0.0));
            }
            other => panic!("expected a layer, got {:?}", other),
        }
    }
}
