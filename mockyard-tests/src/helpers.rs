pub mod daemon_harness;
pub mod mock_scripts;
pub mod wait_utils;
