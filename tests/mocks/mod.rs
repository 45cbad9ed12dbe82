pub mod mock_engines;
pub mod test_data_generator;

pub use mock_engines::{CountingEngine, FailingEngine, SleepyEngine};
pub use test_data_generator::{DataGeneratorConfig, TestDataGenerator};
