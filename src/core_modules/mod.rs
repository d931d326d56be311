pub mod compositor;
pub mod epoch;
pub mod harmonic;
pub mod monitor;
pub mod noise;
pub mod observation;
pub mod raster;
pub mod retrain;
