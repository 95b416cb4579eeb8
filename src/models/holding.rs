use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A portfolio position: how many units of which instrument.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    /// Instrument symbol, canonicalized by the engine on use
    pub symbol: String,

    /// Number of units held
    pub quantity: Decimal,
}

impl Holding {
    /// Create a holding for `quantity` units of `symbol`.
    pub fn new(symbol: String, quantity: Decimal) -> Self {
        Self { symbol, quantity }
    }
}
