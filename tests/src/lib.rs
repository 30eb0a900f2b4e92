// Stratus Tests
//
// This is a meta-package that organizes the test structure
// It doesn't contain actual test code, just the organization of tests

/// Re-export test modules for easier access
pub mod tests {
    #[cfg(feature = "integrations")]
    pub use stratus_integration_tests as integrations;
}
