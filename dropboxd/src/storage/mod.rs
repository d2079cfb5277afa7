mod credential_store;

pub use credential_store::{CredentialRecord, CredentialStore, StoreError};
