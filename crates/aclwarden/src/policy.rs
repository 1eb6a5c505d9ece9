// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Policy engine: turns an object's current rule set into the desired one.
//!
//! [`PolicyEngine::apply`] is a pure function of its inputs. It never touches
//! the filesystem, which keeps every mode testable against hand-built rule
//! sets and makes repeated application converge (`apply(apply(x)) == apply(x)`).

use crate::acl::{Effect, ObjectKind, PermissionRule, Principal, Rights, RuleSet};
use crate::config::{KindPolicy, PolicyConfig, PolicyMode};

/// Result of applying the policy to one rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    /// Desired rule set, owner included.
    pub rules: RuleSet,
    /// Rules present in the result but not in the input.
    pub added: Vec<PermissionRule>,
    /// Rules present in the input but not in the result.
    pub removed: Vec<PermissionRule>,
    pub owner_changed: bool,
    pub protection_changed: bool,
}

impl PolicyOutcome {
    /// Owner to set, if it differs from the current one.
    pub fn new_owner(&self) -> Option<&Principal> {
        if self.owner_changed {
            self.rules.owner.as_ref()
        } else {
            None
        }
    }

    /// Whether the rule list or protection flag must be written back.
    pub fn rules_changed(&self) -> bool {
        self.protection_changed || !self.added.is_empty() || !self.removed.is_empty()
    }

    pub fn is_noop(&self) -> bool {
        !self.owner_changed && !self.rules_changed()
    }
}

/// Applies the configured access model.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn mode(&self) -> PolicyMode {
        self.config.mode
    }

    /// Compute the desired rule set for a newly created object.
    pub fn apply(&self, current: &RuleSet, kind: ObjectKind) -> PolicyOutcome {
        self.apply_with(current, self.kind_policy(kind))
    }

    /// Compute the desired rule set for a directory reached by propagation.
    pub fn apply_propagated(&self, current: &RuleSet) -> PolicyOutcome {
        self.apply_with(current, self.config.propagated)
    }

    /// Compute the desired rule set under an explicit protection and
    /// ownership treatment.
    pub fn apply_with(&self, current: &RuleSet, kind_policy: KindPolicy) -> PolicyOutcome {
        let mut next = current.clone();

        match self.config.mode {
            PolicyMode::Additive => {
                self.protect(&mut next, kind_policy);
                self.grant(&mut next);
            }
            PolicyMode::Subtractive => {
                self.protect(&mut next, kind_policy);
                self.strip(&mut next);
            }
            PolicyMode::Rebuild => self.rebuild(&mut next),
        }

        if kind_policy.take_ownership && next.owner.as_ref() != Some(&self.config.privileged) {
            next.owner = Some(self.config.privileged.clone());
        }

        diff(current, next)
    }

    /// Principals exempt from write stripping.
    pub fn is_trusted(&self, principal: &Principal) -> bool {
        self.config.privileged.matches(principal)
            || self.config.allow_list.iter().any(|p| p.matches(principal))
    }

    /// Treatment of a newly created object of `kind`.
    pub fn kind_policy(&self, kind: ObjectKind) -> KindPolicy {
        match kind {
            ObjectKind::File => self.config.file,
            ObjectKind::Directory => self.config.directory,
        }
    }

    fn protect(&self, rules: &mut RuleSet, kind_policy: KindPolicy) {
        if kind_policy.protect {
            rules.protect(self.config.preserve_inherited);
        }
    }

    fn grant(&self, rules: &mut RuleSet) {
        if self.config.grant_broad_read {
            rules.add_rule(PermissionRule::allow(
                self.config.broad.clone(),
                Rights::READ,
            ));
        }
        rules.add_rule(PermissionRule::allow(
            self.config.privileged.clone(),
            Rights::FULL_CONTROL,
        ));
    }

    fn strip(&self, rules: &mut RuleSet) {
        let broad = &self.config.broad;
        rules.rules.retain(|rule| {
            if rule.inherited {
                return true;
            }
            if self.config.revoke_broad && rule.principal.matches(broad) {
                return false;
            }
            if rule.effect == Effect::Deny || self.is_trusted(&rule.principal) {
                return true;
            }
            !self.config.strict && !rule.rights.grants_write()
        });
    }

    /// Explicit allow grants are rewritten in place. Deny and inherited rules
    /// pass through unchanged.
    fn rebuild(&self, rules: &mut RuleSet) {
        let system = &self.config.system;
        let mut rebuilt: Vec<PermissionRule> = Vec::with_capacity(rules.rules.len() + 1);

        for rule in rules.rules.drain(..) {
            if rule.inherited || rule.effect == Effect::Deny {
                rebuilt.push(rule);
                continue;
            }
            let already = rebuilt
                .iter()
                .any(|r| !r.inherited && r.effect == Effect::Allow && r.principal == rule.principal);
            if already {
                continue;
            }
            let rights = if rule.principal.matches(system) {
                Rights::FULL_CONTROL
            } else {
                Rights::READ
            };
            rebuilt.push(PermissionRule { rights, ..rule });
        }

        rules.rules = rebuilt;
        rules.add_rule(PermissionRule::allow(system.clone(), Rights::FULL_CONTROL));
    }
}

fn diff(current: &RuleSet, next: RuleSet) -> PolicyOutcome {
    let removed = current
        .rules
        .iter()
        .filter(|r| !next.rules.contains(r))
        .cloned()
        .collect();
    let added = next
        .rules
        .iter()
        .filter(|r| !current.rules.contains(r))
        .cloned()
        .collect();

    PolicyOutcome {
        owner_changed: next.owner != current.owner,
        protection_changed: next.protected != current.protected,
        added,
        removed,
        rules: next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(mode: PolicyMode) -> PolicyEngine {
        PolicyEngine::new(PolicyConfig {
            mode,
            ..Default::default()
        })
    }

    fn sample() -> RuleSet {
        RuleSet::new()
            .with_owner("alice")
            .with_rule(PermissionRule::allow("SYSTEM", Rights::FULL_CONTROL))
            .with_rule(PermissionRule::allow("alice", Rights::MODIFY))
            .with_rule(PermissionRule::allow("Everyone", Rights::READ))
            .with_rule(PermissionRule::allow("Users", Rights::READ).inherited())
    }

    #[test]
    fn test_subtractive_strips_writers() {
        let engine = PolicyEngine::new(PolicyConfig {
            mode: PolicyMode::Subtractive,
            allow_list: vec![Principal::new("SYSTEM")],
            ..Default::default()
        });

        let out = engine.apply(&sample(), ObjectKind::File);
        let rules = &out.rules;

        assert!(rules.protected);
        assert!(rules
            .rules
            .contains(&PermissionRule::allow("SYSTEM", Rights::FULL_CONTROL)));
        assert!(rules
            .rules
            .contains(&PermissionRule::allow("Everyone", Rights::READ)));
        assert!(!rules.rules.iter().any(|r| r.principal == "alice".into()));
        // inherited rule dropped by protection
        assert_eq!(rules.rules.len(), 2);
        assert_eq!(out.new_owner(), Some(&Principal::new("Administrators")));
        assert!(out.removed.contains(&PermissionRule::allow("alice", Rights::MODIFY)));
    }

    #[test]
    fn test_subtractive_keeps_qualified_allow_listed() {
        let engine = engine(PolicyMode::Subtractive);
        let set = RuleSet::new()
            .with_rule(PermissionRule::allow("NT AUTHORITY\\SYSTEM", Rights::MODIFY))
            .with_rule(PermissionRule::allow("CORP\\Domain Admins", Rights::FULL_CONTROL))
            .with_rule(PermissionRule::allow("BUILTIN\\Administrators", Rights::FULL_CONTROL))
            .with_rule(PermissionRule::allow("CORP\\bob", Rights::WRITE));

        let out = engine.apply(&set, ObjectKind::Directory);
        assert_eq!(out.rules.rules.len(), 3);
        assert_eq!(out.removed, vec![PermissionRule::allow("CORP\\bob", Rights::WRITE)]);
    }

    #[test]
    fn test_subtractive_keeps_deny_rules() {
        let engine = engine(PolicyMode::Subtractive);
        let set = RuleSet::new()
            .with_owner("Administrators")
            .protected(true)
            .with_rule(PermissionRule::deny("bob", Rights::WRITE));
        let out = engine.apply(&set, ObjectKind::Directory);
        assert!(out.is_noop());
    }

    #[test]
    fn test_subtractive_strict_and_revoke_broad() {
        let engine = PolicyEngine::new(PolicyConfig {
            mode: PolicyMode::Subtractive,
            strict: true,
            revoke_broad: true,
            ..Default::default()
        });
        let set = RuleSet::new()
            .with_rule(PermissionRule::allow("SYSTEM", Rights::FULL_CONTROL))
            .with_rule(PermissionRule::allow("Authenticated Users", Rights::READ))
            .with_rule(PermissionRule::deny("authenticated users", Rights::WRITE))
            .with_rule(PermissionRule::allow("carol", Rights::READ));

        let out = engine.apply(&set, ObjectKind::File);
        assert_eq!(
            out.rules.rules,
            vec![PermissionRule::allow("SYSTEM", Rights::FULL_CONTROL)]
        );
    }

    #[test]
    fn test_additive_grants() {
        let engine = engine(PolicyMode::Additive);
        let out = engine.apply(&sample(), ObjectKind::File);

        assert!(out.rules.protected);
        assert_eq!(
            out.rules.allowed_rights(&Principal::new("Authenticated Users")),
            Rights::READ
        );
        assert_eq!(
            out.rules.allowed_rights(&Principal::new("administrators")),
            Rights::FULL_CONTROL
        );
        // additive keeps existing explicit rules
        assert!(out
            .rules
            .rules
            .contains(&PermissionRule::allow("alice", Rights::MODIFY)));
        assert_eq!(out.added.len(), 2);
    }

    #[test]
    fn test_additive_without_broad_read() {
        let engine = PolicyEngine::new(PolicyConfig {
            mode: PolicyMode::Additive,
            grant_broad_read: false,
            ..Default::default()
        });
        let out = engine.apply(&RuleSet::new(), ObjectKind::Directory);
        assert_eq!(
            out.rules.rules,
            vec![PermissionRule::allow("Administrators", Rights::FULL_CONTROL)]
        );
        assert!(out.rules.protected);
        assert!(out.owner_changed);

        // propagated directories: no protection, no takeover
        let out = engine.apply_propagated(&RuleSet::new());
        assert!(!out.rules.protected);
        assert!(!out.owner_changed);
    }

    #[test]
    fn test_created_directory_drops_inherited_writers() {
        let engine = engine(PolicyMode::Subtractive);
        let set = RuleSet::new()
            .with_owner("alice")
            .with_rule(PermissionRule::allow("Users", Rights::MODIFY).inherited());

        let out = engine.apply(&set, ObjectKind::Directory);
        assert!(out.rules.protected);
        assert!(out.rules.rules.is_empty());
        assert_eq!(out.new_owner(), Some(&Principal::new("Administrators")));

        let out = engine.apply_propagated(&set);
        assert!(out.is_noop());
    }

    #[test]
    fn test_delete_or_execute_only_rules_kept() {
        let engine = engine(PolicyMode::Subtractive);
        let set = RuleSet::new()
            .with_owner("Administrators")
            .protected(true)
            .with_rule(PermissionRule::allow("bob", Rights::DELETE))
            .with_rule(PermissionRule::allow("carol", Rights::EXECUTE | Rights::DELETE))
            .with_rule(PermissionRule::allow("dave", Rights::WRITE));

        let out = engine.apply(&set, ObjectKind::File);
        assert_eq!(out.removed, vec![PermissionRule::allow("dave", Rights::WRITE)]);
        assert_eq!(out.rules.rules.len(), 2);
    }

    #[test]
    fn test_rebuild_downgrades() {
        let engine = engine(PolicyMode::Rebuild);
        let set = RuleSet::new()
            .with_rule(PermissionRule::allow("alice", Rights::MODIFY))
            .with_rule(PermissionRule::allow("SYSTEM", Rights::READ))
            .with_rule(PermissionRule::allow("alice", Rights::WRITE))
            .with_rule(PermissionRule::deny("mallory", Rights::READ))
            .with_rule(PermissionRule::allow("Users", Rights::MODIFY).inherited());

        let out = engine.apply(&set, ObjectKind::Directory);
        assert_eq!(
            out.rules.rules,
            vec![
                PermissionRule::allow("alice", Rights::READ),
                PermissionRule::allow("SYSTEM", Rights::FULL_CONTROL),
                PermissionRule::deny("mallory", Rights::READ),
                PermissionRule::allow("Users", Rights::MODIFY).inherited(),
            ]
        );
        assert!(!out.rules.protected);
    }

    #[test]
    fn test_rebuild_grants_missing_system() {
        let engine = engine(PolicyMode::Rebuild);
        let out = engine.apply(
            &RuleSet::new().with_rule(PermissionRule::allow("bob", Rights::FULL_CONTROL)),
            ObjectKind::Directory,
        );
        assert_eq!(
            out.rules.rules,
            vec![
                PermissionRule::allow("bob", Rights::READ),
                PermissionRule::allow("SYSTEM", Rights::FULL_CONTROL),
            ]
        );
    }

    #[test]
    fn test_idempotent_all_modes() {
        for mode in [PolicyMode::Additive, PolicyMode::Subtractive, PolicyMode::Rebuild] {
            let engine = engine(mode);
            for kind in [ObjectKind::File, ObjectKind::Directory] {
                let first = engine.apply(&sample(), kind);
                let second = engine.apply(&first.rules, kind);
                assert_eq!(second.rules, first.rules, "{} {}", mode, kind);
                assert!(second.is_noop(), "{} {}", mode, kind);
            }
        }
    }

    #[test]
    fn test_preserve_inherited() {
        let engine = PolicyEngine::new(PolicyConfig {
            mode: PolicyMode::Subtractive,
            preserve_inherited: true,
            ..Default::default()
        });
        let out = engine.apply(&sample(), ObjectKind::File);
        assert!(out
            .rules
            .rules
            .contains(&PermissionRule::allow("Users", Rights::READ)));
    }

    #[test]
    fn test_owner_already_privileged() {
        let engine = engine(PolicyMode::Subtractive);
        let set = RuleSet::new().with_owner("ADMINISTRATORS").protected(true);
        let out = engine.apply(&set, ObjectKind::File);
        assert!(out.is_noop());
    }
}
