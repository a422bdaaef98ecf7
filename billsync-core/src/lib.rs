mod client;

pub use client::{
    ApiError, ApiErrorClass, BatchFailure, BatchOutcome, BillsyncClient, RecordAction,
    RemoteRecord, SyncRecord,
};
