//! Runnable demos for `promptsheet`. See the `examples/` directory.
