// Order execution and market data module
pub mod broker;
pub mod executor;
pub mod paper;
pub mod position_manager;
pub mod scanner;

pub use broker::{Broker, OrderRequest};
pub use executor::{CloseAllReport, TradeExecutor};
pub use paper::PaperBroker;
pub use position_manager::{
    ClosedPosition, ExitReason, Position, PositionManager, SessionStatistics, SlotReservation,
};
pub use scanner::{MarketScanner, MarketSnapshot};
