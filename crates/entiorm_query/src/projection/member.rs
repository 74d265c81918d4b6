//! Member paths.

use crate::expression::MemberIdentity;
use std::fmt;
use std::sync::Arc;

/// An immutable path of members from the root of a result shape to a leaf.
///
/// Equality and hashing are element-wise over the path. Appending or
/// prepending returns a new path and leaves `self` untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectionMember {
    members: Arc<[MemberIdentity]>,
}

impl ProjectionMember {
    /// The empty path: the root of the result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a path from its members, outermost first.
    pub fn from_members(members: impl IntoIterator<Item = MemberIdentity>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }

    /// Returns a path extended by `member` at the leaf end.
    #[must_use]
    pub fn add_member(&self, member: MemberIdentity) -> Self {
        let mut members = self.members.to_vec();
        members.push(member);
        Self::from_members(members)
    }

    /// Returns a path with `member` inserted at the root end.
    ///
    /// Used when a result is nested one level deeper, e.g. under the
    /// `Outer`/`Inner` members of a join.
    #[must_use]
    pub fn prepend(&self, member: MemberIdentity) -> Self {
        Self::from_members(std::iter::once(member).chain(self.members.iter().cloned()))
    }

    /// Returns the members, outermost first.
    pub fn members(&self) -> &[MemberIdentity] {
        &self.members
    }

    /// Returns the leaf member.
    pub fn last(&self) -> Option<&MemberIdentity> {
        self.members.last()
    }

    /// Returns true for the root path.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }
}

impl fmt::Display for ProjectionMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.members.is_empty() {
            return f.write_str("EmptyProjectionMember");
        }
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{member}")?;
        }
        Ok(())
    }
}
