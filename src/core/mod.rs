pub mod cashflow;
pub mod component;
pub mod profile;
pub mod resource;
pub mod system;
pub mod transfer;

pub use cashflow::{CashFlow, CashFlowKind};
pub use component::{Component, ComponentBuilder, ComponentKind, Flexibility, StorageSpec};
pub use profile::Profile;
pub use resource::Resource;
pub use system::System;
pub use transfer::{
    MultiRatioTransfer, PolynomialTerm, PolynomialTransfer, RatioTransfer, TransferFn,
    TransferRelation,
};
