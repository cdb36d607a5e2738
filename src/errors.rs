//! Typed error taxonomy for the sector store.

use thiserror::Error;

/// Errors the store reports through typed return values.
///
/// Recoverable conditions (`NotFound`, `UnknownType` on an optional path)
/// are usually surfaced as `None`/`null` by the calling method instead of
/// this enum; this enum covers the cases that are contract violations or
/// hard resource limits and therefore always need to be reported.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The id equals the reserved sentinel `INVALID_ID`.
    #[error("invalid entity id (sentinel value)")]
    InvalidId,

    /// The component type tag is not registered in this store's layout.
    #[error("unknown component type: {0}")]
    UnknownType(u32),

    /// Copy was requested on a store containing at least one move-only field.
    #[error("store contains a move-only component and cannot be copied")]
    CopyUnsupported,

    /// The sparse index or chunk table would overflow the underlying index width.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A per-id pin counter would exceed its 16-bit saturation point.
    #[error("pin counter saturated for id {0}")]
    PinSaturated(u32),

    /// Layout registration requested more component slots than the 32-bit
    /// alive-mask can address.
    #[error("too many components registered: {0} exceeds the 32-slot limit")]
    TooManyComponents(usize),
}

pub type Result<T> = std::result::Result<T, StoreError>;
