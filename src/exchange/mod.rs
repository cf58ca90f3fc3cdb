pub mod aster;
pub mod backpack;
pub(crate) mod post_only;
pub mod registry;
pub mod traits;

pub use registry::{build_adapter, supported_exchanges};
pub use traits::{parse_exchange_kind, ExchangeAdapter, ExchangeKind};
