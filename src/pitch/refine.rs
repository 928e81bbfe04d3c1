//! Sub-bin refinement of an activation peak.

const MIN_CURVATURE: f32 = 1e-6;

/// Fractional position of the peak at `bin` via a parabola through it and its neighbours.
///
/// Edge bins and flat neighbourhoods fall back to the integer bin.
pub fn refine_peak(activations: &[f32], bin: usize) -> f32 {
    if bin == 0 || bin + 1 >= activations.len() {
        return bin as f32;
    }

    let left = activations[bin - 1];
    let center = activations[bin];
    let right = activations[bin + 1];

    let curvature = left - 2.0 * center + right;
    if curvature.abs() < MIN_CURVATURE {
        return bin as f32;
    }

    let offset = 0.5 * (left - right) / curvature;
    // A true local maximum never moves more than half a bin.
    bin as f32 + offset.clamp(-0.5, 0.5)
}
