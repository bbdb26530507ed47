pub mod client;
pub mod filter;

pub use client::{
    AsyncJobHandle, CopyRequest, CoreStats, JobOutput, RCloneClient, RcloneJobStatus, TransferStat,
};
pub use filter::{build_fs_pair, escape_glob, FsPair};
