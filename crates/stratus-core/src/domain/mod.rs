/// Wire envelope
pub mod envelope;

/// Destinations and names
pub mod address;

/// Authority-owned records
pub mod records;

/// Resource authority interface
pub mod authority;

/// Transport interface
pub mod transport;
