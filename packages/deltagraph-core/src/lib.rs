#![forbid(unsafe_code)]
//! Branch-tolerant store of structured deltas shared by cooperating apps.
//! Apps push changes against a version tag and pull everything committed since a tag; pushes
//! made against a stale tag are merged into the mainline by operational transform. History
//! lives in a reference-counted version graph that elides versions nobody holds.

pub mod config;
pub mod cursor;
pub mod delta;
pub mod error;
pub mod graph;
pub mod ids;
pub mod manager;
pub mod merge;
pub mod protocol;
pub mod repository;
pub mod schema;
pub mod traits;
pub mod transform;

pub use config::{RepositoryConfig, TypeConfig};
pub use cursor::{Cursor, Step};
pub use delta::{Delta, DimMap, Event, ObjectChange, ObjectList, TypeMarkers};
pub use error::{Error, Result};
pub use graph::{Edge, NodeInfo, VersionGraph};
pub use ids::{fresh_merge_tag, NodeId, ROOT_TAG};
pub use manager::{Retrieved, Strategies, VersionManager};
pub use merge::{merge_delta, merge_object, merge_object_lists};
pub use protocol::{
    PullRequest, PushRequest, Request, RequestKind, Response, Status, TransferField,
};
pub use repository::Repository;
pub use schema::{Schema, TypeSchema};
pub use traits::{
    BuiltinPolicy, Conflict, ConflictHook, MergeInput, MergeOutput, MergeStrategy, Resolution,
};
pub use transform::operational_transform;
