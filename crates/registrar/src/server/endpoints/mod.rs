pub mod advisor;
pub mod enrollment;
pub mod status;
