//! Resolution targets: users and computers of the directory.

use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Type of object in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    User,
    Computer,
}

impl ObjectClass {
    /// Names of the GPO subdirectory holding the policies of this class,
    /// most common spelling first.
    pub fn policy_dirs(self) -> [&'static str; 2] {
        match self {
            ObjectClass::User => ["User", "USER"],
            ObjectClass::Computer => ["Machine", "MACHINE"],
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectClass::User => write!(f, "user"),
            ObjectClass::Computer => write!(f, "computer"),
        }
    }
}

impl FromStr for ObjectClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(ObjectClass::User),
            "computer" => Ok(ObjectClass::Computer),
            _ => Err(Error::InvalidTarget {
                target: s.to_string(),
                message: "object class must be user or computer".to_string(),
            }),
        }
    }
}

/// Checks that `object_name` can be resolved as `class` on `hostname`.
///
/// The name is also used as a single path component under the cache and
/// runtime directories.
pub fn validate_target(object_name: &str, class: ObjectClass, hostname: &str) -> Result<()> {
    if matches!(object_name, "" | "." | "..")
        || object_name.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidTarget {
            target: object_name.to_string(),
            message: "object name can't be empty or contain path separators".to_string(),
        });
    }

    match class {
        ObjectClass::User if !object_name.contains('@') => Err(Error::InvalidTarget {
            target: object_name.to_string(),
            message: format!("user name should be of the form {}@DOMAIN", object_name),
        }),
        ObjectClass::Computer if object_name != hostname => Err(Error::InvalidTarget {
            target: object_name.to_string(),
            message: format!("computer isn't current host {:?}", hostname),
        }),
        _ => Ok(()),
    }
}

/// Transforms a target name to the form used for caching and resolution.
///
/// Names are lowercased. Computers lose their domain part. Users become
/// `user@domain`, either from `DOMAIN\user` or by appending
/// `default_domain_suffix` to a bare name. When `class` is unknown, the
/// hostname is taken as a computer and anything else as a user.
pub fn normalize_target_name(
    target: &str,
    class: Option<ObjectClass>,
    hostname: &str,
    default_domain_suffix: &str,
) -> Result<String> {
    let target = target.to_lowercase();

    if class == Some(ObjectClass::Computer) {
        // Some hosts report their FQDN
        let short = target.split('.').next().unwrap_or_default();
        return Ok(short.to_string());
    }
    if class.is_none() && target == hostname {
        return Ok(target);
    }
    if target.contains('@') {
        return Ok(target);
    }

    let parts: Vec<&str> = target.split('\\').collect();
    let (domain, user) = match parts.as_slice() {
        [user] => ("", *user),
        [domain, user] => (*domain, *user),
        _ => {
            return Err(Error::InvalidTarget {
                target: target.clone(),
                message: r"only one \ is permitted in domain\username".to_string(),
            })
        }
    };

    let domain = if domain.is_empty() {
        default_domain_suffix
    } else {
        domain
    };
    if domain.is_empty() {
        return Err(Error::InvalidTarget {
            target: target.clone(),
            message: "no domain provided and no default domain configured".to_string(),
        });
    }

    let normalized = format!("{}@{}", user, domain);
    debug!("Target name {:?} normalized to {:?}", target, normalized);
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "myhost";

    #[test]
    fn test_object_class_parsing() {
        assert_eq!("user".parse::<ObjectClass>().unwrap(), ObjectClass::User);
        assert_eq!(
            "computer".parse::<ObjectClass>().unwrap(),
            ObjectClass::Computer
        );
        assert!("group".parse::<ObjectClass>().is_err());
        assert_eq!(ObjectClass::Computer.to_string(), "computer");
    }

    #[test]
    fn test_validate_target() {
        assert!(validate_target("bob@example.com", ObjectClass::User, HOST).is_ok());
        assert!(validate_target("myhost", ObjectClass::Computer, HOST).is_ok());

        assert!(matches!(
            validate_target("bob", ObjectClass::User, HOST),
            Err(Error::InvalidTarget { .. })
        ));
        assert!(matches!(
            validate_target("otherhost", ObjectClass::Computer, HOST),
            Err(Error::InvalidTarget { .. })
        ));

        for name in [
            "../../escaped@x",
            "bob@example.com/..",
            "sub/bob@example.com",
            r"..\bob@example.com",
            "bob\0@example.com",
            "..",
            "",
        ] {
            assert!(
                matches!(
                    validate_target(name, ObjectClass::User, HOST),
                    Err(Error::InvalidTarget { .. })
                ),
                "{:?} should be rejected",
                name
            );
        }
        assert!(matches!(
            validate_target("..", ObjectClass::Computer, ".."),
            Err(Error::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_normalize_target_name() {
        let cases: &[(&str, Option<ObjectClass>, &str, &str)] = &[
            ("Bob@Example.com", Some(ObjectClass::User), "", "bob@example.com"),
            (r"EXAMPLE\Bob", Some(ObjectClass::User), "", "bob@example"),
            ("bob", Some(ObjectClass::User), "example.com", "bob@example.com"),
            (r"\bob", None, "example.com", "bob@example.com"),
            ("MyHost.example.com", Some(ObjectClass::Computer), "", "myhost"),
            ("myhost", None, "", "myhost"),
            ("bob", None, "example.com", "bob@example.com"),
        ];

        for (target, class, suffix, want) in cases {
            assert_eq!(
                normalize_target_name(target, *class, HOST, suffix).unwrap(),
                *want,
                "normalizing {:?}",
                target
            );
        }
    }

    #[test]
    fn test_normalize_target_name_errors() {
        assert!(matches!(
            normalize_target_name(r"a\b\c", Some(ObjectClass::User), HOST, "example.com"),
            Err(Error::InvalidTarget { .. })
        ));
        assert!(matches!(
            normalize_target_name("bob", Some(ObjectClass::User), HOST, ""),
            Err(Error::InvalidTarget { .. })
        ));
    }
}
