//! Shared constants for end-to-end tests
//!
//! When tokens or protocol fixtures change, update only this file.

// ============================================================================
// Bearer Tokens
// ============================================================================

/// Token granting `content.create`
pub const EDITOR_TOKEN: &str = "editor-token";

/// Caller id behind `EDITOR_TOKEN`
pub const EDITOR_ID: &str = "editor-1";

/// Token with no permissions at all
pub const READER_TOKEN: &str = "reader-token";

/// Token whose expiry lies in the past
pub const EXPIRED_TOKEN: &str = "expired-token";

// ============================================================================
// Protocol
// ============================================================================

/// Protocol version sent by the test client
pub const CLIENT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Well-formed session id that no server ever issued
pub const UNKNOWN_SESSION_ID: &str = "12345678-1234-1234-1234-123456789abc";

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;
