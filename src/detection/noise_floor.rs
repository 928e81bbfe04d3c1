use crate::config::EngineConfig;

/// Above this multiple of the floor a frame is treated as signal and left out of the floor.
const SIGNAL_RATIO: f32 = 5.0;
/// Keeps a floor that decayed through digital silence from underflowing to zero.
const MIN_FLOOR: f32 = 1e-6;

/// Adaptive estimate of the ambient noise level, from which the silence threshold follows.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseFloor {
    floor: f32,
    initial: f32,
    decay: f32,
    attack: f32,
    multiplier: f32,
    min_absolute: f32,
}

impl NoiseFloor {
    pub fn new(config: &EngineConfig) -> Self {
        let initial = config.initial_noise_floor.max(0.0);
        NoiseFloor {
            floor: initial,
            initial,
            decay: config.noise_floor_decay.clamp(0.0, 1.0),
            attack: config.noise_floor_attack.clamp(0.0, 1.0),
            multiplier: config.silence_multiplier,
            min_absolute: config.preset.min_volume_rms,
        }
    }

    pub fn reset(&mut self) {
        self.floor = self.initial;
    }

    pub fn floor(&self) -> f32 {
        self.floor
    }

    pub fn update(&mut self, rms: f32) -> f32 {
        let rms = rms.max(0.0);
        if rms < self.floor {
            self.floor = self.floor * self.decay + rms * (1.0 - self.decay);
        } else if rms <= self.floor * SIGNAL_RATIO {
            self.floor = self.floor * (1.0 - self.attack) + rms * self.attack;
        }
        self.floor = self.floor.max(MIN_FLOOR);
        self.floor
    }

    /// Volume below which a frame counts as silence.
    pub fn silence_threshold(&self) -> f32 {
        self.min_absolute.max(self.floor * self.multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor() -> NoiseFloor {
        NoiseFloor::new(&EngineConfig::default())
    }

    #[test]
    fn test_floor_falls_towards_quiet_input() {
        let mut nf = floor();
        let start = nf.floor();
        for _ in 0..100 {
            nf.update(0.0);
        }
        assert!(nf.floor() < start * 0.01);
        assert!(nf.floor() >= 0.0);
    }

    #[test]
    fn test_floor_recovers_after_long_digital_silence() {
        let mut nf = floor();
        for _ in 0..5000 {
            nf.update(0.0);
        }
        let bottom = nf.floor();
        assert!(bottom > 0.0, "floor underflowed");
        nf.update(bottom * 3.0);
        assert!(nf.floor() > bottom, "floor stuck at {}", bottom);
    }

    #[test]
    fn test_floor_rises_slowly_with_ambient_noise() {
        let mut nf = floor();
        let start = nf.floor();
        nf.update(start * 3.0);
        assert!(nf.floor() > start);
        assert!(nf.floor() < start * 1.1, "rise should be slow, got {}", nf.floor());
    }

    #[test]
    fn test_loud_signal_does_not_contaminate_floor() {
        let mut nf = floor();
        let start = nf.floor();
        for _ in 0..50 {
            nf.update(0.5);
        }
        assert_eq!(nf.floor(), start);
    }

    #[test]
    fn test_threshold_never_below_absolute_minimum() {
        let mut nf = floor();
        for _ in 0..100 {
            nf.update(0.0);
        }
        let config = EngineConfig::default();
        assert_eq!(nf.silence_threshold(), config.preset.min_volume_rms);
    }

    #[test]
    fn test_threshold_tracks_noisy_room() {
        let mut nf = floor();
        // Ambient noise creeping up a little at a time stays within the attack band
        let mut level = nf.floor();
        for _ in 0..2000 {
            level = (level * 1.002).min(0.02);
            nf.update(level);
        }
        assert!(nf.silence_threshold() > EngineConfig::default().preset.min_volume_rms);
    }

    #[test]
    fn test_reset_restores_initial_floor() {
        let mut nf = floor();
        nf.update(0.002);
        nf.reset();
        assert_eq!(nf, floor());
    }
}
