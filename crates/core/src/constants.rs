//! Well-known constant values shared across the workspace.
//!
//! These must stay in sync with the cache keys and job payloads already in
//! the wild; renaming a prefix orphans every entry written under the old one.

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Administrator role name.
pub const ROLE_ADMIN: &str = "Admin";
/// Regular user role name.
pub const ROLE_USER: &str = "User";

// ---------------------------------------------------------------------------
// Token use
// ---------------------------------------------------------------------------

/// The `token_use` claim value for access tokens.
pub const TOKEN_USE_ACCESS: &str = "access";
/// The `token_use` claim value for refresh tokens.
pub const TOKEN_USE_REFRESH: &str = "refresh";

// ---------------------------------------------------------------------------
// Cache key type prefixes
// ---------------------------------------------------------------------------
//
// Cache keys are namespaced `{type_prefix}{key}` so unrelated domains never
// collide inside one logical store.

/// Prefix for per-user token revocation marks.
pub const CACHE_TYPE_TOKEN_EXPIRED: &str = "tokenExpired:";
