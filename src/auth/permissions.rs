use anyhow::Error;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// A fine-grained capability. Variants ending in `Own` apply only to resources
/// the caller owns, variants ending in `Self` only to the caller's own records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    UserListRead,
    UserListWrite,
    UserDataRead,
    UserDataReadSelf,
    UserDataWrite,
    UserBlockManage,
    UserRoleManage,

    CourseInfoWrite,
    CourseInfoWriteOwn,
    CourseDelete,
    CourseTestListRead,
    CourseTestListOwn,
    CourseTestListEnrolled,
    CourseTestReadOwn,
    CourseTestReadEnrolled,
    CourseTestWrite,
    CourseTestWriteOwn,
    CourseTestAdd,
    CourseTestAddOwn,
    CourseStudentRead,
    CourseStudentReadOwn,
    CourseStudentWrite,
    CourseStudentWriteOwn,
    CourseUserAddSelf,

    TestAnswerRead,
    TestAnswerReadOwn,
    TestActivateManage,
    TestActivateManageOwn,

    AttemptCreate,
    AttemptUpdateSelf,
    AttemptCompleteSelf,
    AttemptReadSelf,
    AnswerReadSelf,
    AnswerUpdateSelf,
    AnswerDeleteSelf,

    NotificationRead,
    NotificationManage,
    NotificationManageSelf,
}

const ALL_PERMISSIONS: [Permission; 38] = [
    Permission::UserListRead,
    Permission::UserListWrite,
    Permission::UserDataRead,
    Permission::UserDataReadSelf,
    Permission::UserDataWrite,
    Permission::UserBlockManage,
    Permission::UserRoleManage,
    Permission::CourseInfoWrite,
    Permission::CourseInfoWriteOwn,
    Permission::CourseDelete,
    Permission::CourseTestListRead,
    Permission::CourseTestListOwn,
    Permission::CourseTestListEnrolled,
    Permission::CourseTestReadOwn,
    Permission::CourseTestReadEnrolled,
    Permission::CourseTestWrite,
    Permission::CourseTestWriteOwn,
    Permission::CourseTestAdd,
    Permission::CourseTestAddOwn,
    Permission::CourseStudentRead,
    Permission::CourseStudentReadOwn,
    Permission::CourseStudentWrite,
    Permission::CourseStudentWriteOwn,
    Permission::CourseUserAddSelf,
    Permission::TestAnswerRead,
    Permission::TestAnswerReadOwn,
    Permission::TestActivateManage,
    Permission::TestActivateManageOwn,
    Permission::AttemptCreate,
    Permission::AttemptUpdateSelf,
    Permission::AttemptCompleteSelf,
    Permission::AttemptReadSelf,
    Permission::AnswerReadSelf,
    Permission::AnswerUpdateSelf,
    Permission::AnswerDeleteSelf,
    Permission::NotificationRead,
    Permission::NotificationManage,
    Permission::NotificationManageSelf,
];

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::UserListRead => "user:list:read",
            Permission::UserListWrite => "user:list:write",
            Permission::UserDataRead => "user:data:read",
            Permission::UserDataReadSelf => "user:data:read:self",
            Permission::UserDataWrite => "user:data:write",
            Permission::UserBlockManage => "user:block:manage",
            Permission::UserRoleManage => "user:role:manage",
            Permission::CourseInfoWrite => "course:info:write",
            Permission::CourseInfoWriteOwn => "course:info:write:own",
            Permission::CourseDelete => "course:del",
            Permission::CourseTestListRead => "course:testList:read",
            Permission::CourseTestListOwn => "course:testList:own",
            Permission::CourseTestListEnrolled => "course:testList:enrolled",
            Permission::CourseTestReadOwn => "course:test:read:own",
            Permission::CourseTestReadEnrolled => "course:test:read:enrolled",
            Permission::CourseTestWrite => "course:test:write",
            Permission::CourseTestWriteOwn => "course:test:write:own",
            Permission::CourseTestAdd => "course:test:add",
            Permission::CourseTestAddOwn => "course:test:add:own",
            Permission::CourseStudentRead => "course:student:read",
            Permission::CourseStudentReadOwn => "course:student:read:own",
            Permission::CourseStudentWrite => "course:student:write",
            Permission::CourseStudentWriteOwn => "course:student:write:own",
            Permission::CourseUserAddSelf => "course:user:add:self",
            Permission::TestAnswerRead => "test:answer:read",
            Permission::TestAnswerReadOwn => "test:answer:read:own",
            Permission::TestActivateManage => "test:activate:manage",
            Permission::TestActivateManageOwn => "test:activate:manage:own",
            Permission::AttemptCreate => "attempt:create",
            Permission::AttemptUpdateSelf => "attempt:update:self",
            Permission::AttemptCompleteSelf => "attempt:complete:self",
            Permission::AttemptReadSelf => "attempt:read:self",
            Permission::AnswerReadSelf => "answer:read:self",
            Permission::AnswerUpdateSelf => "answer:update:self",
            Permission::AnswerDeleteSelf => "answer:del:self",
            Permission::NotificationRead => "notification:read",
            Permission::NotificationManage => "notification:manage",
            Permission::NotificationManageSelf => "notification:manage:self",
        }
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PERMISSIONS
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| Error::msg(format!("Unknown permission: {}", s)))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

static STUDENT_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    HashSet::from([
        Permission::UserDataReadSelf,
        Permission::CourseTestListEnrolled,
        Permission::CourseTestReadEnrolled,
        Permission::AttemptCreate,
        Permission::AttemptUpdateSelf,
        Permission::AttemptCompleteSelf,
        Permission::AttemptReadSelf,
        Permission::AnswerReadSelf,
        Permission::AnswerUpdateSelf,
        Permission::AnswerDeleteSelf,
        Permission::CourseUserAddSelf,
        Permission::NotificationRead,
        Permission::NotificationManageSelf,
    ])
});

static TEACHER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    HashSet::from([
        Permission::UserListRead,
        Permission::UserDataRead,
        Permission::CourseInfoWriteOwn,
        Permission::CourseTestListOwn,
        Permission::CourseTestReadOwn,
        Permission::CourseTestWriteOwn,
        Permission::CourseTestAddOwn,
        Permission::TestAnswerReadOwn,
        Permission::TestActivateManageOwn,
        Permission::NotificationRead,
        Permission::CourseStudentWriteOwn,
        Permission::CourseStudentReadOwn,
    ])
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    HashSet::from([
        Permission::UserListRead,
        Permission::UserListWrite,
        Permission::UserDataRead,
        Permission::UserDataWrite,
        Permission::UserBlockManage,
        Permission::UserRoleManage,
        Permission::CourseInfoWrite,
        Permission::CourseDelete,
        Permission::CourseTestWrite,
        Permission::CourseTestAdd,
        Permission::CourseTestListRead,
        Permission::TestAnswerRead,
        Permission::TestActivateManage,
        Permission::NotificationRead,
        Permission::CourseStudentWrite,
        Permission::CourseStudentRead,
        Permission::NotificationManage,
    ])
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Student => &STUDENT_PERMISSIONS,
            Role::Teacher => &TEACHER_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Union of the permission sets of every role held.
pub fn permissions_for_roles(roles: &[Role]) -> HashSet<Permission> {
    roles
        .iter()
        .flat_map(|role| role.permissions().iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_for_roles_is_union() {
        let permissions = permissions_for_roles(&[Role::Student, Role::Teacher]);

        assert!(permissions.contains(&Permission::AttemptCreate));
        assert!(permissions.contains(&Permission::CourseTestWriteOwn));
        assert!(!permissions.contains(&Permission::CourseTestWrite));
        assert_eq!(
            permissions.len(),
            STUDENT_PERMISSIONS.len() + TEACHER_PERMISSIONS.len() - 1 // notification:read
        );
    }

    #[test]
    fn test_no_roles_means_no_permissions() {
        assert!(permissions_for_roles(&[]).is_empty());
    }

    #[test]
    fn test_admin_cannot_take_attempts() {
        assert!(!Role::Admin.has_permission(Permission::AttemptCreate));
        assert!(Role::Admin.has_permission(Permission::TestAnswerRead));
    }

    #[test]
    fn test_permission_parsing() {
        assert_eq!(
            "test:activate:manage:own".parse::<Permission>().unwrap(),
            Permission::TestActivateManageOwn
        );
        assert!("course:test:write:everything".parse::<Permission>().is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("teacher".parse::<Role>().unwrap(), Role::Teacher);
        assert!("coach".parse::<Role>().is_err());
    }
}
