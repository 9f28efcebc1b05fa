pub mod analysis;
pub mod cycle;
pub mod simulate;
pub mod worker;
