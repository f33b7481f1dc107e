use crate::delta::{DimMap, ObjectChange};
use crate::error::Result;

/// Per-type merge policy registered when the repository is built.
///
/// `local` and `remote` are oriented by whether the push came from an external peer: for an
/// external push the already committed mainline is `local` and the pushed record is `remote`.
pub trait MergeStrategy: Send + Sync {
    fn merge(&self, input: MergeInput) -> Result<MergeOutput>;
}

impl<F> MergeStrategy for F
where
    F: Fn(MergeInput) -> Result<MergeOutput> + Send + Sync,
{
    fn merge(&self, input: MergeInput) -> Result<MergeOutput> {
        self(input)
    }
}

/// Everything a strategy sees about one conflicting object.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeInput {
    pub type_name: String,
    pub oid: String,
    /// State before the divergence, `None` when both sides created the object.
    pub original: Option<DimMap>,
    /// `None` when the local side deleted the object.
    pub local: Option<DimMap>,
    /// `None` when the remote side deleted the object.
    pub remote: Option<DimMap>,
    pub local_raw: Vec<u8>,
    pub remote_raw: Vec<u8>,
}

/// Patches produced by a strategy. `local` is applied on top of the local side's state,
/// `remote` on top of the remote side's state. `None` means nothing to apply.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeOutput {
    pub local: Option<ObjectChange>,
    pub remote: Option<ObjectChange>,
}

/// One object both sides of a divergence touched.
#[derive(Clone, Copy, Debug)]
pub struct Conflict<'a> {
    pub type_name: &'a str,
    pub oid: &'a str,
    pub pushed: &'a ObjectChange,
    pub concurrent: &'a ObjectChange,
}

/// Patch pair for one object: `pushed` lands on top of the mainline head, `concurrent` on top
/// of the pushed end.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    pub pushed: Option<ObjectChange>,
    pub concurrent: Option<ObjectChange>,
}

/// Hook consulted by the operational transform before it falls back to the built-in policy.
pub trait ConflictHook {
    fn handles(&self, type_name: &str) -> bool;
    fn resolve(&self, conflict: Conflict<'_>) -> Result<Resolution>;
}

/// Always defers to the built-in policy.
pub struct BuiltinPolicy;

impl ConflictHook for BuiltinPolicy {
    fn handles(&self, _type_name: &str) -> bool {
        false
    }

    fn resolve(&self, _conflict: Conflict<'_>) -> Result<Resolution> {
        Ok(Resolution::default())
    }
}
