//! Liveness status of a task, independent of its control state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Undefined,
    Inactive,
    Partial,
    Active,
    Undeployable,
    Invariant,
}

impl Status {
    /// The `X` product for liveness roll-ups.
    ///
    /// `Undefined` absorbs everything, `Invariant` is the identity,
    /// `Undeployable` dominates everything but `Undefined`, and any mix of
    /// `Inactive`/`Partial`/`Active` that is not a pair of equals is `Partial`.
    pub fn product(self, other: Status) -> Status {
        use Status::*;
        if self == other {
            return self;
        }
        match (self, other) {
            (Undefined, _) | (_, Undefined) => Undefined,
            (Invariant, s) | (s, Invariant) => s,
            (Undeployable, _) | (_, Undeployable) => Undeployable,
            _ => Partial,
        }
    }

    /// Fold with [`Status::product`], starting from `Invariant`.
    pub fn fold<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
        statuses
            .into_iter()
            .fold(Status::Invariant, |acc, s| acc.product(s))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Undefined => "UNDEFINED",
            Status::Inactive => "INACTIVE",
            Status::Partial => "PARTIAL",
            Status::Active => "ACTIVE",
            Status::Undeployable => "UNDEPLOYABLE",
            Status::Invariant => "INVARIANT",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "INACTIVE" => Status::Inactive,
            "PARTIAL" => Status::Partial,
            "ACTIVE" => Status::Active,
            "UNDEPLOYABLE" => Status::Undeployable,
            "INVARIANT" => Status::Invariant,
            _ => Status::Undefined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Status::*;

    const ALL: [Status; 6] = [Undefined, Inactive, Partial, Active, Undeployable, Invariant];

    #[test]
    fn product_is_commutative() {
        for a in ALL {
            for b in ALL {
                assert_eq!(a.product(b), b.product(a), "{a} x {b}");
            }
        }
    }

    #[test]
    fn invariant_is_identity() {
        for s in ALL {
            assert_eq!(Invariant.product(s), s);
        }
    }

    #[test]
    fn undefined_absorbs() {
        for s in ALL {
            assert_eq!(Undefined.product(s), Undefined);
        }
    }

    #[test]
    fn undeployable_dominates_all_but_undefined() {
        for s in ALL.into_iter().filter(|s| *s != Undefined) {
            assert_eq!(Undeployable.product(s), Undeployable);
        }
    }

    #[test]
    fn product_table() {
        assert_eq!(Inactive.product(Active), Partial);
        assert_eq!(Partial.product(Inactive), Partial);
        assert_eq!(Partial.product(Active), Partial);
        assert_eq!(Active.product(Active), Active);
        assert_eq!(Inactive.product(Inactive), Inactive);
    }

    #[test]
    fn fold_rolls_up() {
        assert_eq!(Status::fold([Active, Active]), Active);
        assert_eq!(Status::fold([Active, Inactive]), Partial);
        assert_eq!(Status::fold([]), Invariant);
    }
}
