// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discretionary access-control model: principals, rights, rules and rule sets.
//!
//! The model follows the named-principal ACL found on NTFS-like filesystems:
//! an object carries an owner, an ordered list of allow/deny rules and a
//! protection flag that blocks inheritance from its parent. Backends that
//! cannot express every part of it (POSIX mode bits) project it as best they
//! can, see [`crate::store`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::str::FromStr;

/// Identity referenced by a rule or owning an object.
///
/// Comparison is case-insensitive: account providers disagree on casing
/// (`BUILTIN\Administrators` vs `builtin\administrators`). Unicode lowercasing
/// is used so the result does not depend on the process locale.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name as given.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Account part of a `DOMAIN\account` name (the whole name if unqualified).
    pub fn account(&self) -> &str {
        match self.0.rsplit_once('\\') {
            Some((_, account)) => account,
            None => &self.0,
        }
    }

    /// Whether the name carries a `DOMAIN\` prefix.
    pub fn is_qualified(&self) -> bool {
        self.0.contains('\\')
    }

    /// Looser match used for allow-lists: an unqualified name matches any
    /// domain-qualified form of the same account.
    pub fn matches(&self, other: &Principal) -> bool {
        if self == other {
            return true;
        }
        if self.is_qualified() && other.is_qualified() {
            return false;
        }
        fold(self.account()) == fold(other.account())
    }

    fn folded(&self) -> String {
        fold(&self.0)
    }
}

fn fold(name: &str) -> String {
    name.trim().to_lowercase()
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.folded() == other.folded()
    }
}

impl Eq for Principal {}

impl Hash for Principal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({:?})", self.0)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Principal {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Set of access rights.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rights(u32);

impl Rights {
    pub const NONE: Rights = Rights(0);
    pub const READ: Rights = Rights(1 << 0);
    pub const WRITE: Rights = Rights(1 << 1);
    pub const EXECUTE: Rights = Rights(1 << 2);
    pub const DELETE: Rights = Rights(1 << 3);
    pub const CHANGE_PERMISSIONS: Rights = Rights(1 << 4);
    pub const TAKE_OWNERSHIP: Rights = Rights(1 << 5);

    /// Read, write, execute and delete.
    pub const MODIFY: Rights = Rights(0b00_1111);
    /// Every right, including permission and ownership changes.
    pub const FULL_CONTROL: Rights = Rights(0b11_1111);

    const NAMED: [(Rights, &'static str); 8] = [
        (Rights::FULL_CONTROL, "FullControl"),
        (Rights::MODIFY, "Modify"),
        (Rights::READ, "Read"),
        (Rights::WRITE, "Write"),
        (Rights::EXECUTE, "Execute"),
        (Rights::DELETE, "Delete"),
        (Rights::CHANGE_PERMISSIONS, "ChangePermissions"),
        (Rights::TAKE_OWNERSHIP, "TakeOwnership"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u32) -> Self {
        Rights(bits & Self::FULL_CONTROL.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every right in `other` is present.
    pub const fn contains(self, other: Rights) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any right in `other` is present.
    pub const fn intersects(self, other: Rights) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the set allows changing content: Write, and so Modify and
    /// FullControl. Delete alone does not count.
    pub const fn grants_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}

impl BitOr for Rights {
    type Output = Rights;

    fn bitor(self, rhs: Rights) -> Rights {
        Rights(self.0 | rhs.0)
    }
}

impl BitOrAssign for Rights {
    fn bitor_assign(&mut self, rhs: Rights) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Rights {
    type Output = Rights;

    fn bitand(self, rhs: Rights) -> Rights {
        Rights(self.0 & rhs.0)
    }
}

impl Not for Rights {
    type Output = Rights;

    fn not(self) -> Rights {
        Rights(!self.0 & Self::FULL_CONTROL.0)
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let mut remaining = *self;
        let mut first = true;
        for (named, label) in Self::NAMED {
            if remaining.contains(named) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(label)?;
                first = false;
                remaining = Rights(remaining.0 & !named.0);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rights({})", self)
    }
}

impl FromStr for Rights {
    type Err = String;

    /// Parses `"Read"`, `"Modify"`, `"Read, Write"` or `"Read|Execute"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rights = Rights::NONE;
        let parts = s
            .split(|c: char| c == ',' || c == '|')
            .map(str::trim)
            .filter(|p| !p.is_empty());
        for part in parts {
            let found = Self::NAMED
                .iter()
                .find(|(_, label)| label.eq_ignore_ascii_case(part))
                .map(|(r, _)| *r);
            match found {
                Some(r) => rights |= r,
                None if part.eq_ignore_ascii_case("none") => {}
                None => return Err(format!("unknown right '{}'", part)),
            }
        }
        Ok(rights)
    }
}

impl Serialize for Rights {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rights {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => f.write_str("Allow"),
            Effect::Deny => f.write_str("Deny"),
        }
    }
}

/// Kind of filesystem object a rule set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    File,
    Directory,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::File => f.write_str("file"),
            ObjectKind::Directory => f.write_str("directory"),
        }
    }
}

/// One access-control entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionRule {
    pub principal: Principal,
    pub rights: Rights,
    pub effect: Effect,
    /// Rule comes from the parent object rather than being set explicitly.
    #[serde(default)]
    pub inherited: bool,
}

impl PermissionRule {
    pub fn allow(principal: impl Into<Principal>, rights: Rights) -> Self {
        Self {
            principal: principal.into(),
            rights,
            effect: Effect::Allow,
            inherited: false,
        }
    }

    pub fn deny(principal: impl Into<Principal>, rights: Rights) -> Self {
        Self {
            principal: principal.into(),
            rights,
            effect: Effect::Deny,
            inherited: false,
        }
    }

    /// Mark as inherited from the parent.
    pub fn inherited(mut self) -> Self {
        self.inherited = true;
        self
    }

    /// Same (principal, rights, effect) triple, ignoring the inheritance marker.
    pub fn same_grant(&self, other: &PermissionRule) -> bool {
        self.principal == other.principal
            && self.rights == other.rights
            && self.effect == other.effect
    }
}

impl fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.principal, self.effect, self.rights)?;
        if self.inherited {
            f.write_str(" (inherited)")?;
        }
        Ok(())
    }
}

/// Owner, protection flag and ordered rules of one object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<PermissionRule>,
    /// Inheritance from the parent is blocked.
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub owner: Option<Principal>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: PermissionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<Principal>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    /// Adds an explicit rule. Rights are merged into an existing explicit
    /// rule for the same principal and effect, so adding twice is a no-op.
    ///
    /// Returns true if the rule set changed.
    pub fn add_rule(&mut self, rule: PermissionRule) -> bool {
        let existing = self.rules.iter_mut().find(|r| {
            !r.inherited && r.principal == rule.principal && r.effect == rule.effect
        });
        match existing {
            Some(r) if r.rights.contains(rule.rights) => false,
            Some(r) => {
                r.rights |= rule.rights;
                true
            }
            None => {
                self.rules.push(PermissionRule {
                    inherited: false,
                    ..rule
                });
                true
            }
        }
    }

    /// Removes every explicit rule matching the (principal, rights, effect)
    /// triple. Returns the number removed.
    pub fn remove_rule(&mut self, rule: &PermissionRule) -> usize {
        let before = self.rules.len();
        self.rules.retain(|r| r.inherited || !r.same_grant(rule));
        before - self.rules.len()
    }

    /// Removes every explicit rule for `principal`, whatever its rights.
    pub fn revoke(&mut self, principal: &Principal) -> Vec<PermissionRule> {
        let (removed, kept) = std::mem::take(&mut self.rules)
            .into_iter()
            .partition(|r| !r.inherited && &r.principal == principal);
        self.rules = kept;
        removed
    }

    /// Blocks inheritance. Inherited rules are dropped, or turned into
    /// explicit copies when `preserve_inherited` is set.
    ///
    /// Returns the inherited rules that were dropped.
    pub fn protect(&mut self, preserve_inherited: bool) -> Vec<PermissionRule> {
        self.protected = true;
        if preserve_inherited {
            let mut materialized = RuleSet::new();
            for rule in self.rules.drain(..) {
                materialized.add_rule(rule);
            }
            self.rules = materialized.rules;
            Vec::new()
        } else {
            let (dropped, kept) = std::mem::take(&mut self.rules)
                .into_iter()
                .partition(|r| r.inherited);
            self.rules = kept;
            dropped
        }
    }

    /// Explicit rules only.
    pub fn explicit(&self) -> impl Iterator<Item = &PermissionRule> {
        self.rules.iter().filter(|r| !r.inherited)
    }

    /// Union of rights allowed to `principal` (exact match).
    pub fn allowed_rights(&self, principal: &Principal) -> Rights {
        self.rules
            .iter()
            .filter(|r| r.effect == Effect::Allow && &r.principal == principal)
            .fold(Rights::NONE, |acc, r| acc | r.rights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_case_insensitive() {
        let a = Principal::new("BUILTIN\\Administrators");
        let b = Principal::new("builtin\\administrators");
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_principal_matches_unqualified() {
        let system = Principal::new("SYSTEM");
        assert!(system.matches(&Principal::new("NT AUTHORITY\\SYSTEM")));
        assert!(Principal::new("nt authority\\system").matches(&system));
        assert!(!Principal::new("CORP\\alice").matches(&Principal::new("HOME\\alice")));
        assert!(!system.matches(&Principal::new("alice")));
    }

    #[test]
    fn test_rights_composites() {
        assert!(Rights::FULL_CONTROL.contains(Rights::MODIFY));
        assert!(Rights::MODIFY.contains(Rights::READ | Rights::WRITE));
        assert!(!Rights::MODIFY.contains(Rights::CHANGE_PERMISSIONS));
        assert!(Rights::MODIFY.grants_write());
        assert!(!(Rights::READ | Rights::EXECUTE).grants_write());
        assert!(!Rights::DELETE.grants_write());
        assert!(!(Rights::EXECUTE | Rights::DELETE).grants_write());
        assert!(Rights::WRITE.grants_write());
        assert_eq!(!Rights::MODIFY, Rights::CHANGE_PERMISSIONS | Rights::TAKE_OWNERSHIP);
    }

    #[test]
    fn test_rights_display_parse() {
        assert_eq!(Rights::FULL_CONTROL.to_string(), "FullControl");
        assert_eq!(Rights::MODIFY.to_string(), "Modify");
        assert_eq!((Rights::READ | Rights::EXECUTE).to_string(), "Read, Execute");
        assert_eq!(Rights::NONE.to_string(), "None");

        assert_eq!("Modify".parse::<Rights>().unwrap(), Rights::MODIFY);
        assert_eq!(
            "read|write".parse::<Rights>().unwrap(),
            Rights::READ | Rights::WRITE
        );
        assert!("Frobnicate".parse::<Rights>().is_err());
    }

    #[test]
    fn test_add_rule_merges() {
        let mut set = RuleSet::new();
        assert!(set.add_rule(PermissionRule::allow("alice", Rights::READ)));
        assert!(set.add_rule(PermissionRule::allow("ALICE", Rights::WRITE)));
        assert!(!set.add_rule(PermissionRule::allow("alice", Rights::READ)));

        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].rights, Rights::READ | Rights::WRITE);
    }

    #[test]
    fn test_add_rule_ignores_inherited_match() {
        let mut set =
            RuleSet::new().with_rule(PermissionRule::allow("alice", Rights::READ).inherited());
        assert!(set.add_rule(PermissionRule::allow("alice", Rights::READ)));
        assert_eq!(set.rules.len(), 2);
        assert!(!set.rules[1].inherited);
    }

    #[test]
    fn test_remove_rule_exact_triple() {
        let mut set = RuleSet::new()
            .with_rule(PermissionRule::allow("alice", Rights::MODIFY))
            .with_rule(PermissionRule::allow("alice", Rights::READ))
            .with_rule(PermissionRule::deny("alice", Rights::MODIFY));

        let removed = set.remove_rule(&PermissionRule::allow("Alice", Rights::MODIFY));
        assert_eq!(removed, 1);
        assert_eq!(set.rules.len(), 2);
    }

    #[test]
    fn test_revoke() {
        let mut set = RuleSet::new()
            .with_rule(PermissionRule::allow("Everyone", Rights::READ))
            .with_rule(PermissionRule::deny("everyone", Rights::WRITE))
            .with_rule(PermissionRule::allow("bob", Rights::READ));

        let removed = set.revoke(&Principal::new("EVERYONE"));
        assert_eq!(removed.len(), 2);
        assert_eq!(set.rules, vec![PermissionRule::allow("bob", Rights::READ)]);
    }

    #[test]
    fn test_protect_drops_inherited() {
        let mut set = RuleSet::new()
            .with_rule(PermissionRule::allow("alice", Rights::READ).inherited())
            .with_rule(PermissionRule::allow("bob", Rights::MODIFY));

        let dropped = set.protect(false);
        assert!(set.protected);
        assert_eq!(dropped.len(), 1);
        assert_eq!(set.rules, vec![PermissionRule::allow("bob", Rights::MODIFY)]);
    }

    #[test]
    fn test_protect_preserves_inherited() {
        let mut set = RuleSet::new()
            .with_rule(PermissionRule::allow("alice", Rights::READ).inherited())
            .with_rule(PermissionRule::allow("alice", Rights::WRITE));

        let dropped = set.protect(true);
        assert!(dropped.is_empty());
        assert_eq!(
            set.rules,
            vec![PermissionRule::allow("alice", Rights::READ | Rights::WRITE)]
        );
    }
}
