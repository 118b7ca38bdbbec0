//! `stocklot-picking` — outgoing allocation orders.

pub mod order;

pub use order::{
    AddOrderLine, AllocationLine, AllocationOrder, AllocationOrderCommand, AllocationOrderEvent,
    AllocationOrderId, AllocationOrderStatus, CancelOrder, CompleteOrder, LineFill, OpenOrder,
    OrderCancelled, OrderCompleted, OrderLineAdded, OrderOpened, OrderPurpose,
};
