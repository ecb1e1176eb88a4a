//! Ports Layer
//!
//! - Driving Ports (inbound) - API for producers, consumers and the runtime
//! - Driven Ports (outbound) - file layer the stores persist through

pub mod inbound;
pub mod outbound;

pub use inbound::PagingApi;
pub use outbound::{
    address_directory_name, address_from_directory_name, PagingStoreFactory, SequentialFile,
    SequentialFileFactory,
};
