// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX mode-bit backend.
//!
//! Rules are projected onto the three permission classes:
//!
//! | class | principal                                   |
//! |-------|---------------------------------------------|
//! | owner | owning user's name (or numeric uid)         |
//! | group | `group:<name>` (or `group:<gid>`)           |
//! | other | `Everyone`, plus any configured alias       |
//!
//! `r` maps to Read, `w` to Write and Delete, `x` to Execute. The owner class
//! also carries ChangePermissions and TakeOwnership. Rules for principals
//! without a class cannot be represented and are skipped. Nothing is
//! inherited, so every object reads back as protected. Symbolic links are
//! refused so a link planted in a watched tree cannot redirect a chmod or
//! chown.
//!
//! uid 0 is reported under the superuser alias (`Administrators` unless
//! changed), and that alias resolves back to uid 0.

use super::{PermissionStore, StoreError};
use crate::acl::{Effect, ObjectKind, PermissionRule, Principal, Rights, RuleSet};
use std::ffi::{CStr, CString};
use std::fs::{self, Metadata, Permissions};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

const GROUP_PREFIX: &str = "group:";
const SPECIAL_BITS: u32 = 0o7000;
const INITIAL_BUF: usize = 1024;
const MAX_BUF: usize = 1 << 20;

/// Mode-bit permission store.
#[derive(Debug, Clone)]
pub struct PosixStore {
    other_aliases: Vec<Principal>,
    superuser: Principal,
}

impl Default for PosixStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PosixStore {
    pub fn new() -> Self {
        Self {
            other_aliases: vec![Principal::new("Everyone")],
            superuser: Principal::new("Administrators"),
        }
    }

    /// Name uid 0 goes by.
    pub fn with_superuser_alias(mut self, principal: Principal) -> Self {
        self.superuser = principal;
        self
    }

    /// Also map `principal` onto the "other" class. The most recent alias
    /// names that class when rules are read.
    pub fn with_other_alias(mut self, principal: Principal) -> Self {
        if !self.other_aliases.contains(&principal) {
            self.other_aliases.push(principal);
        }
        self
    }

    fn metadata(&self, path: &Path) -> Result<Metadata, StoreError> {
        let meta = fs::symlink_metadata(path).map_err(|e| StoreError::from_io(path, e))?;
        if meta.file_type().is_symlink() {
            return Err(StoreError::Unsupported(format!(
                "{} is a symbolic link",
                path.display()
            )));
        }
        Ok(meta)
    }

    fn checked_metadata(&self, path: &Path, expected: ObjectKind) -> Result<Metadata, StoreError> {
        let meta = self.metadata(path)?;
        let found = kind_of(&meta);
        if found != expected {
            return Err(StoreError::KindMismatch {
                path: path.to_path_buf(),
                expected,
                found,
            });
        }
        Ok(meta)
    }

    fn other_principal(&self) -> Principal {
        self.other_aliases
            .last()
            .cloned()
            .unwrap_or_else(|| Principal::new("Everyone"))
    }

    fn owner_principal(&self, uid: u32) -> Principal {
        if uid == 0 {
            return self.superuser.clone();
        }
        Principal::new(user_name(uid).unwrap_or_else(|| uid.to_string()))
    }

    fn resolve_owner(&self, owner: &Principal) -> Result<Owner, StoreError> {
        let unknown = || StoreError::UnknownPrincipal(owner.to_string());
        if owner.matches(&self.superuser) {
            return Ok(Owner::User(0));
        }
        let name = owner.name().trim();
        match name.strip_prefix(GROUP_PREFIX) {
            Some(group) => resolve_gid(group).map(Owner::Group).ok_or_else(unknown),
            None => resolve_uid(name).map(Owner::User).ok_or_else(unknown),
        }
    }

    fn class_of(&self, principal: &Principal, owner: &Principal, group: &Principal) -> Option<Class> {
        if principal == owner {
            Some(Class::Owner)
        } else if principal == group {
            Some(Class::Group)
        } else if self.other_aliases.iter().any(|a| a.matches(principal)) {
            Some(Class::Other)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Owner {
    User(u32),
    Group(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Owner,
    Group,
    Other,
}

impl Class {
    fn shift(self) -> u32 {
        match self {
            Class::Owner => 6,
            Class::Group => 3,
            Class::Other => 0,
        }
    }
}

fn kind_of(meta: &Metadata) -> ObjectKind {
    if meta.is_dir() {
        ObjectKind::Directory
    } else {
        ObjectKind::File
    }
}

fn bits_to_rights(bits: u32) -> Rights {
    let mut rights = Rights::NONE;
    if bits & 0o4 != 0 {
        rights |= Rights::READ;
    }
    if bits & 0o2 != 0 {
        rights |= Rights::WRITE | Rights::DELETE;
    }
    if bits & 0o1 != 0 {
        rights |= Rights::EXECUTE;
    }
    rights
}

fn rights_to_bits(rights: Rights) -> u32 {
    let mut bits = 0;
    if rights.contains(Rights::READ) {
        bits |= 0o4;
    }
    if rights.contains(Rights::WRITE) {
        bits |= 0o2;
    }
    if rights.contains(Rights::EXECUTE) {
        bits |= 0o1;
    }
    bits
}

fn group_principal(gid: u32) -> Principal {
    let name = group_name(gid).unwrap_or_else(|| gid.to_string());
    Principal::new(format!("{}{}", GROUP_PREFIX, name))
}

impl PermissionStore for PosixStore {
    fn get_rules(&self, path: &Path, kind: ObjectKind) -> Result<RuleSet, StoreError> {
        let meta = self.checked_metadata(path, kind)?;
        let mode = meta.permissions().mode();
        let owner = self.owner_principal(meta.uid());
        let group = group_principal(meta.gid());

        let mut rules = RuleSet::new().with_owner(owner.clone()).protected(true);
        rules.rules.push(PermissionRule::allow(
            owner,
            bits_to_rights((mode >> 6) & 0o7) | Rights::CHANGE_PERMISSIONS | Rights::TAKE_OWNERSHIP,
        ));
        for (principal, bits) in [
            (group, (mode >> 3) & 0o7),
            (self.other_principal(), mode & 0o7),
        ] {
            if bits != 0 {
                rules.rules.push(PermissionRule::allow(principal, bits_to_rights(bits)));
            }
        }
        Ok(rules)
    }

    fn set_rules(&self, path: &Path, kind: ObjectKind, rules: &RuleSet) -> Result<(), StoreError> {
        let meta = self.checked_metadata(path, kind)?;
        let current = meta.permissions().mode();
        let owner = self.owner_principal(meta.uid());
        let group = group_principal(meta.gid());

        let mut allowed = [0u32; 3];
        let mut denied = [0u32; 3];
        for rule in &rules.rules {
            let Some(class) = self.class_of(&rule.principal, &owner, &group) else {
                tracing::debug!(
                    path = %path.display(),
                    rule = %rule,
                    "rule has no mode-bit class, skipped"
                );
                continue;
            };
            let slot = match class {
                Class::Owner => 0,
                Class::Group => 1,
                Class::Other => 2,
            };
            match rule.effect {
                Effect::Allow => allowed[slot] |= rights_to_bits(rule.rights),
                Effect::Deny => denied[slot] |= rights_to_bits(rule.rights),
            }
        }

        let mut mode = current & SPECIAL_BITS;
        for (slot, class) in [Class::Owner, Class::Group, Class::Other].into_iter().enumerate() {
            mode |= (allowed[slot] & !denied[slot]) << class.shift();
        }

        if mode == current & 0o7777 {
            return Ok(());
        }
        tracing::debug!(
            path = %path.display(),
            from = format_args!("{:o}", current & 0o7777),
            to = format_args!("{:o}", mode),
            "chmod"
        );
        fs::set_permissions(path, Permissions::from_mode(mode)).map_err(|e| StoreError::from_io(path, e))
    }

    fn get_owner(&self, path: &Path) -> Result<Principal, StoreError> {
        let meta = self.metadata(path)?;
        Ok(self.owner_principal(meta.uid()))
    }

    fn set_owner(&self, path: &Path, owner: &Principal) -> Result<(), StoreError> {
        self.metadata(path)?;
        let result = match self.resolve_owner(owner)? {
            Owner::User(uid) => std::os::unix::fs::chown(path, Some(uid), None),
            Owner::Group(gid) => std::os::unix::fs::chown(path, None, Some(gid)),
        };
        result.map_err(|e| StoreError::from_io(path, e))
    }

    fn resolve_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        self.resolve_owner(principal).map(|_| ())
    }

    fn object_kind(&self, path: &Path) -> Result<ObjectKind, StoreError> {
        Ok(kind_of(&self.metadata(path)?))
    }
}

fn resolve_uid(name: &str) -> Option<u32> {
    if let Ok(uid) = name.parse::<u32>() {
        return Some(uid);
    }
    let c_name = CString::new(name).ok()?;
    with_buffer(|buf| {
        // SAFETY: passwd is a plain C struct; all-zero is a valid initial value.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        // SAFETY: every pointer is valid for the duration of the call and
        // `buf.len()` is the real buffer size.
        let rc = unsafe {
            libc::getpwnam_r(c_name.as_ptr(), &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result)
        };
        if rc != 0 {
            return Err(rc);
        }
        Ok((!result.is_null()).then_some(pwd.pw_uid))
    })
}

fn resolve_gid(name: &str) -> Option<u32> {
    if let Ok(gid) = name.parse::<u32>() {
        return Some(gid);
    }
    let c_name = CString::new(name).ok()?;
    with_buffer(|buf| {
        // SAFETY: group is a plain C struct; all-zero is a valid initial value.
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        // SAFETY: as in resolve_uid.
        let rc = unsafe {
            libc::getgrnam_r(c_name.as_ptr(), &mut grp, buf.as_mut_ptr(), buf.len(), &mut result)
        };
        if rc != 0 {
            return Err(rc);
        }
        Ok((!result.is_null()).then_some(grp.gr_gid))
    })
}

fn user_name(uid: u32) -> Option<String> {
    with_buffer(|buf| {
        // SAFETY: passwd is a plain C struct; all-zero is a valid initial value.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        // SAFETY: as in resolve_uid.
        let rc = unsafe {
            libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result)
        };
        if rc != 0 {
            return Err(rc);
        }
        if result.is_null() || pwd.pw_name.is_null() {
            return Ok(None);
        }
        // SAFETY: on success pw_name points to a NUL-terminated string inside `buf`.
        let name = unsafe { CStr::from_ptr(pwd.pw_name) };
        Ok(Some(name.to_string_lossy().into_owned()))
    })
}

fn group_name(gid: u32) -> Option<String> {
    with_buffer(|buf| {
        // SAFETY: group is a plain C struct; all-zero is a valid initial value.
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        // SAFETY: as in resolve_uid.
        let rc = unsafe {
            libc::getgrgid_r(gid, &mut grp, buf.as_mut_ptr(), buf.len(), &mut result)
        };
        if rc != 0 {
            return Err(rc);
        }
        if result.is_null() || grp.gr_name.is_null() {
            return Ok(None);
        }
        // SAFETY: on success gr_name points to a NUL-terminated string inside `buf`.
        let name = unsafe { CStr::from_ptr(grp.gr_name) };
        Ok(Some(name.to_string_lossy().into_owned()))
    })
}

/// Runs a reentrant account-database lookup, growing the scratch buffer on
/// `ERANGE`.
fn with_buffer<T>(
    mut lookup: impl FnMut(&mut Vec<libc::c_char>) -> Result<Option<T>, libc::c_int>,
) -> Option<T> {
    let mut buf: Vec<libc::c_char> = vec![0; INITIAL_BUF];
    loop {
        match lookup(&mut buf) {
            Ok(found) => return found,
            Err(libc::ERANGE) if buf.len() < MAX_BUF => {
                let grown = buf.len() * 2;
                buf.resize(grown, 0);
            }
            Err(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn test_bits_mapping() {
        assert_eq!(bits_to_rights(0o7), Rights::MODIFY);
        assert_eq!(bits_to_rights(0o5), Rights::READ | Rights::EXECUTE);
        assert_eq!(rights_to_bits(Rights::FULL_CONTROL), 0o7);
        assert_eq!(rights_to_bits(Rights::READ), 0o4);
        assert_eq!(rights_to_bits(Rights::WRITE), 0o2);
        assert_eq!(rights_to_bits(Rights::DELETE | Rights::EXECUTE), 0o1);
    }

    #[test]
    fn test_get_rules_projects_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f.txt");
        fs::write(&path, b"x").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o664)).unwrap();

        let store = PosixStore::new();
        let rules = store.get_rules(&path, ObjectKind::File).unwrap();
        let owner = store.get_owner(&path).unwrap();

        assert_eq!(rules.owner.as_ref(), Some(&owner));
        assert_eq!(rules.rules.len(), 3);
        assert_eq!(
            rules.allowed_rights(&owner),
            Rights::READ
                | Rights::WRITE
                | Rights::DELETE
                | Rights::CHANGE_PERMISSIONS
                | Rights::TAKE_OWNERSHIP
        );
        assert_eq!(rules.allowed_rights(&Principal::new("everyone")), Rights::READ);
    }

    #[test]
    fn test_set_rules_writes_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f.txt");
        fs::write(&path, b"x").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o666)).unwrap();

        let store = PosixStore::new().with_other_alias(Principal::new("Authenticated Users"));
        let mut rules = store.get_rules(&path, ObjectKind::File).unwrap();
        // drop group and other write, keep owner as is
        let owner = rules.owner.clone().unwrap();
        rules.rules.retain(|r| r.principal == owner);
        rules.rules.push(PermissionRule::allow("Authenticated Users", Rights::READ));
        rules.rules.push(PermissionRule::allow("nobody-known", Rights::FULL_CONTROL));
        store.set_rules(&path, ObjectKind::File, &rules).unwrap();

        assert_eq!(mode_of(&path), 0o604);
    }

    #[test]
    fn test_deny_clears_bits() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("d");
        fs::create_dir(&path).unwrap();

        let store = PosixStore::new();
        let rules = RuleSet::new()
            .with_rule(PermissionRule::allow("Everyone", Rights::MODIFY))
            .with_rule(PermissionRule::deny("Everyone", Rights::WRITE));
        store.set_rules(&path, ObjectKind::Directory, &rules).unwrap();

        assert_eq!(mode_of(&path), 0o005);
        // restore so TempDir can clean up
        fs::set_permissions(&path, Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_kind_mismatch_and_symlink() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("f.txt");
        fs::write(&file, b"x").unwrap();
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&file, &link).unwrap();

        let store = PosixStore::new();
        assert!(matches!(
            store.get_rules(&file, ObjectKind::Directory),
            Err(StoreError::KindMismatch { .. })
        ));
        assert!(matches!(
            store.get_rules(&link, ObjectKind::File),
            Err(StoreError::Unsupported(_))
        ));
    }

    #[test]
    fn test_set_owner_to_current_owner() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f.txt");
        fs::write(&path, b"x").unwrap();

        let store = PosixStore::new();
        let owner = store.get_owner(&path).unwrap();
        store.set_owner(&path, &owner).unwrap();
        assert_eq!(store.get_owner(&path).unwrap(), owner);

        let err = store
            .set_owner(&path, &Principal::new("no-such-user-aclwarden"))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownPrincipal(_)));
    }
}
