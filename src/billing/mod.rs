pub mod ledger;
pub mod rates;
pub mod settlement;

pub use ledger::{
    AdjustmentDetails, AdjustmentType, ConsumeLogEntry, Ledger, LogType, PgLedger,
};
pub use rates::{ConfiguredRates, RateProvider};
pub use settlement::{
    compute_actual_quota, resolve_model_name, SettlementAction, SettlementEngine,
    SettlementOutcome, SettlementRates,
};
