/// A (host, job) edge. The `(previous_hash, current_hash)` pair encodes the
/// transition state used by the deployment orchestrator's hash diff:
/// `(None, Some(h))` = new, `(Some(h), Some(h))` = unchanged,
/// `(Some(a), Some(b))` with `a != b` = changed, `removed=true` = withdrawn.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
    pub host_id: String,
    pub host_ip: String,
    pub job: String,
    pub disabled: bool,
    pub removed: bool,
    pub current_hash: Option<String>,
    pub previous_hash: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    New,
    Unchanged,
    Changed,
    Removed,
}

impl Allocation {
    pub fn transition(&self) -> Transition {
        if self.removed {
            return Transition::Removed;
        }
        match (&self.previous_hash, &self.current_hash) {
            (None, Some(_)) => Transition::New,
            (Some(a), Some(b)) if a == b => Transition::Unchanged,
            (Some(_), Some(_)) => Transition::Changed,
            _ => Transition::New,
        }
    }
}
