//! `stocklot-stocktake` — two-phase physical stock counts.

pub mod count;

pub use count::{
    ApproveCount, CountApproved, CountOpened, CountSubmitted, CountedLine, LineComputation,
    OpenCount, StockCount, StockCountCommand, StockCountEvent, StockCountId, StockCountLine,
    StockCountStatus, SubmitCount,
};
