//! Trade condition classification.
//!
//! Every trade reported on the consolidated tape carries zero or more
//! single-character sale condition codes. Their meaning depends on the
//! reporting network: CTA (tapes A and B) and UTP (tape C) publish separate
//! tables. [`classify`] folds the applicable entries into a [`TradeContext`]
//! that tells the candle engine which aggregates a tick may touch.
//!
//! The tables are simplified from the CTA and UTP participant specifications
//! and are kept as plain data so they can be revised without touching the
//! algorithm.

use tracing::warn;

/// How a single trade affects the candle it falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeContext {
    pub extended_hours: bool,
    pub update_last: bool,
    pub update_high_low: bool,
    pub update_volume: bool,
}

impl TradeContext {
    /// A regular trade: updates every aggregate.
    pub const REGULAR: Self = Self::new(false, true, true, true);

    const fn new(
        extended_hours: bool,
        update_last: bool,
        update_high_low: bool,
        update_volume: bool,
    ) -> Self {
        Self {
            extended_hours,
            update_last,
            update_high_low,
            update_volume,
        }
    }

    /// Combines the policies of two conditions that apply to the same trade.
    ///
    /// Update flags survive only if both sides endorse them; extended-hours
    /// status sticks if either side asserts it.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        Self {
            extended_hours: self.extended_hours || other.extended_hours,
            update_last: self.update_last && other.update_last,
            update_high_low: self.update_high_low && other.update_high_low,
            update_volume: self.update_volume && other.update_volume,
        }
    }
}

impl Default for TradeContext {
    fn default() -> Self {
        Self::REGULAR
    }
}

/// Reporting network whose condition table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tape {
    /// Consolidated Tape Association (NYSE and regional listings).
    Cta,
    /// Unlisted Trading Privileges (Nasdaq listings).
    Utp,
}

impl Tape {
    /// Maps a tape letter to its network.
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "A" | "B" => Some(Self::Cta),
            "C" => Some(Self::Utp),
            _ => None,
        }
    }

    fn table(self) -> &'static [(char, TradeContext)] {
        match self {
            Self::Cta => CTA_CONDITIONS,
            Self::Utp => UTP_CONDITIONS,
        }
    }

    /// Looks up the policy for one condition code.
    pub fn lookup(self, code: char) -> Option<TradeContext> {
        self.table()
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, ctx)| *ctx)
    }
}

const ALL: TradeContext = TradeContext::REGULAR;
const NONE: TradeContext = TradeContext::new(false, false, false, false);
const VOLUME_ONLY: TradeContext = TradeContext::new(false, false, false, true);
const HIGH_LOW_VOLUME: TradeContext = TradeContext::new(false, false, true, true);
const PRICE_ONLY: TradeContext = TradeContext::new(false, true, true, false);
const EXTENDED: TradeContext = TradeContext::new(true, false, false, true);

static CTA_CONDITIONS: &[(char, TradeContext)] = &[
    (' ', ALL),             // Regular sale
    ('@', ALL),             // Regular sale
    ('B', VOLUME_ONLY),     // Average price trade
    ('C', VOLUME_ONLY),     // Cash trade
    ('E', ALL),             // Automatic execution
    ('F', ALL),             // Intermarket sweep order
    ('H', VOLUME_ONLY),     // Price variation trade
    ('I', VOLUME_ONLY),     // Odd lot trade
    ('K', ALL),             // Rule 127 / Rule 155
    ('L', ALL),             // Sold last
    ('M', NONE),            // Market center official close
    ('N', VOLUME_ONLY),     // Next day trade
    ('O', ALL),             // Market center opening trade
    ('P', HIGH_LOW_VOLUME), // Prior reference price
    ('Q', NONE),            // Market center official open
    ('R', VOLUME_ONLY),     // Seller
    ('T', EXTENDED),        // Extended hours trade
    ('U', EXTENDED),        // Extended hours sold out of sequence
    ('V', VOLUME_ONLY),     // Contingent trade
    ('X', ALL),             // Cross trade
    ('Z', HIGH_LOW_VOLUME), // Sold out of sequence
    ('4', HIGH_LOW_VOLUME), // Derivatively priced
    ('5', ALL),             // Market center reopening trade
    ('6', ALL),             // Market center closing trade
    ('7', VOLUME_ONLY),     // Qualified contingent trade
    ('9', PRICE_ONLY),      // Corrected consolidated close
];

static UTP_CONDITIONS: &[(char, TradeContext)] = &[
    ('@', ALL),             // Regular sale
    ('A', ALL),             // Acquisition
    ('B', ALL),             // Bunched trade
    ('C', VOLUME_ONLY),     // Cash sale
    ('D', ALL),             // Distribution
    ('E', NONE),            // Placeholder
    ('F', ALL),             // Intermarket sweep
    ('G', HIGH_LOW_VOLUME), // Bunched sold trade
    ('H', VOLUME_ONLY),     // Price variation trade
    ('I', VOLUME_ONLY),     // Odd lot trade
    ('K', ALL),             // Rule 155 trade
    ('L', ALL),             // Sold last
    ('M', NONE),            // Market center official close
    ('N', VOLUME_ONLY),     // Next day
    ('O', ALL),             // Opening prints
    ('P', HIGH_LOW_VOLUME), // Prior reference price
    ('Q', NONE),            // Market center official open
    ('R', VOLUME_ONLY),     // Seller
    ('S', ALL),             // Split trade
    ('T', EXTENDED),        // Form T
    ('U', EXTENDED),        // Extended trading hours, sold out of sequence
    ('V', VOLUME_ONLY),     // Contingent trade
    ('W', VOLUME_ONLY),     // Average price trade
    ('X', ALL),             // Cross trade
    ('Y', ALL),             // Yellow flag regular trade
    ('Z', HIGH_LOW_VOLUME), // Sold out of sequence
    ('1', ALL),             // Stopped stock
    ('4', HIGH_LOW_VOLUME), // Derivatively priced
    ('5', ALL),             // Re-opening prints
    ('6', ALL),             // Closing prints
    ('7', VOLUME_ONLY),     // Qualified contingent trade
    ('8', ALL),             // Placeholder for 611 exempt
    ('9', PRICE_ONLY),      // Corrected consolidated close
];

/// Classifies a trade from its tape and condition codes.
///
/// Unknown tapes and codes are logged and ignored, so missing data degrades
/// to regular-trade semantics.
pub fn classify<I, S>(tape: &str, conditions: I) -> TradeContext
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let Some(tape_kind) = Tape::from_id(tape) else {
        warn!(tape, "unknown tape, treating trade as regular");
        return TradeContext::REGULAR;
    };

    conditions
        .into_iter()
        .fold(TradeContext::REGULAR, |ctx, code| {
            let code = code.as_ref();
            match single_char(code).and_then(|c| tape_kind.lookup(c)) {
                Some(policy) => ctx.combine(policy),
                None => {
                    warn!(tape, code, "unknown trade condition");
                    ctx
                }
            }
        })
}

fn single_char(code: &str) -> Option<char> {
    let mut chars = code.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}
