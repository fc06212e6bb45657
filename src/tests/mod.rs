// Cross-module tests and the hardware mocks shared by unit tests


mod pipeline_tests;
mod romfs_props;
