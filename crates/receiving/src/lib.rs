//! `stocklot-receiving` — goods-receipt orders and per-line reconciliation.

pub mod receipt;

pub use receipt::{
    AddReceiptLine, CancelReceipt, DamageSynthesized, LineActualsRecorded, MarkDamageSynthesized,
    OpenReceipt, ReceiptCancelled, ReceiptCommand, ReceiptEvent, ReceiptLine, ReceiptLineAdded,
    ReceiptOpened, ReceiptOrder, ReceiptOrderId, ReceiptStatus, RecordLineActuals,
};
