pub mod transaction;

pub use transaction::{
    Currency, NewTransaction, PaymentMethod, Transaction, TransactionStatus, TransactionType,
};
