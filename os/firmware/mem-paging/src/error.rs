use crate::addresses::PhysicalAddress;
use crate::page_table::PagingLevel;
use crate::pool::PoolError;

/// Errors raised while building or protecting page tables.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PagingError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("{address} is not mapped (non-present entry at level {level:?})")]
    NotMapped {
        address: PhysicalAddress,
        level: PagingLevel,
    },
}
