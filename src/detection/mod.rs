pub mod noise_floor;
pub mod onset;
pub mod stability;
