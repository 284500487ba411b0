/// Committee roster and snapshots
///
/// The live roster is derived from users holding a committee role. The
/// snapshot engine freezes it into immutable records covering consecutive
/// terms, and the scheduler arms the next capture.

pub mod engine;
pub mod sanitize;
pub mod scheduler;

pub use engine::{Snapshot, SnapshotEngine, SnapshotSummary};
pub use scheduler::{SnapshotScheduler, TimerSlot};

use crate::db::models::User;
use sanitize::{clean_image_path, strip_markup};
use serde::{Deserialize, Serialize};

/// Leadership seats in canonical display order
pub const LEADERSHIP_ROLES: [&str; 7] = [
    "President",
    "Vice President",
    "Secretary",
    "Assistant Secretary",
    "Treasurer",
    "Assistant Treasurer",
    "Club Manager",
];

/// Role for ordinary committee membership
pub const COMMITTEE_MEMBER_ROLE: &str = "Committee Member";

/// Whether a role may be assigned through the committee admin routes
pub fn is_assignable_role(role: &str) -> bool {
    role == COMMITTEE_MEMBER_ROLE || LEADERSHIP_ROLES.contains(&role)
}

/// Sanitized member as it appears in rosters and snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterMember {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub image_path: Option<String>,
}

impl From<&User> for RosterMember {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: strip_markup(&user.name),
            email: strip_markup(&user.email),
            image_path: clean_image_path(user.image_path.as_deref()),
        }
    }
}

/// One filled leadership seat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadershipSeat {
    pub role: String,
    pub member: RosterMember,
}

/// Partitioned committee: leadership in canonical order, then members
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitteeRoster {
    pub leadership: Vec<LeadershipSeat>,
    pub member: Vec<RosterMember>,
}

impl CommitteeRoster {
    /// Partition users by committee role; unknown roles are left out
    pub fn from_users(users: &[User]) -> Self {
        let mut leadership = Vec::new();
        for role in LEADERSHIP_ROLES {
            for user in users.iter().filter(|u| u.committee_role.as_deref() == Some(role)) {
                leadership.push(LeadershipSeat {
                    role: strip_markup(role),
                    member: RosterMember::from(user),
                });
            }
        }

        let member = users
            .iter()
            .filter(|u| u.committee_role.as_deref() == Some(COMMITTEE_MEMBER_ROLE))
            .map(RosterMember::from)
            .collect();

        Self { leadership, member }
    }

    /// Re-apply sanitization to data read back from storage
    pub fn sanitized(self) -> Self {
        let clean = |m: RosterMember| RosterMember {
            id: m.id,
            name: strip_markup(&m.name),
            email: strip_markup(&m.email),
            image_path: clean_image_path(m.image_path.as_deref()),
        };

        Self {
            leadership: self
                .leadership
                .into_iter()
                .map(|seat| LeadershipSeat {
                    role: strip_markup(&seat.role),
                    member: clean(seat.member),
                })
                .collect(),
            member: self.member.into_iter().map(clean).collect(),
        }
    }
}

/// Roster member as shown to anonymous visitors
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicMember {
    pub id: i64,
    pub name: String,
    pub image_path: Option<String>,
}

impl From<&RosterMember> for PublicMember {
    fn from(member: &RosterMember) -> Self {
        Self {
            id: member.id,
            name: member.name.clone(),
            image_path: member.image_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicSeat {
    pub role: String,
    pub member: PublicMember,
}

/// Live roster without contact details
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublicRoster {
    pub leadership: Vec<PublicSeat>,
    pub member: Vec<PublicMember>,
}

impl From<&CommitteeRoster> for PublicRoster {
    fn from(roster: &CommitteeRoster) -> Self {
        Self {
            leadership: roster
                .leadership
                .iter()
                .map(|seat| PublicSeat {
                    role: seat.role.clone(),
                    member: PublicMember::from(&seat.member),
                })
                .collect(),
            member: roster.member.iter().map(PublicMember::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{AccountStatus, Role};
    use chrono::Utc;

    fn user(id: i64, name: &str, role: Option<&str>) -> User {
        let now = Utc::now();
        User {
            id,
            name: name.to_string(),
            email: format!("user{}@example.com", id),
            password_hash: String::new(),
            role: Role::Member,
            account_status: AccountStatus::Active,
            member_type: None,
            contact: None,
            address: None,
            organization: None,
            image_path: Some(format!("/uploads/{}.png", id)),
            committee_role: role.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_partition_and_order() {
        let users = vec![
            user(1, "Tess", Some("Treasurer")),
            user(2, "Cole", Some(COMMITTEE_MEMBER_ROLE)),
            user(3, "Pia", Some("President")),
            user(4, "Sam", Some("Secretary")),
            user(5, "Nobody", Some("Mascot")),
            user(6, "Vic", Some("Vice President")),
        ];

        let roster = CommitteeRoster::from_users(&users);
        let roles: Vec<_> = roster.leadership.iter().map(|s| s.role.as_str()).collect();
        assert_eq!(roles, vec!["President", "Vice President", "Secretary", "Treasurer"]);
        assert_eq!(roster.member.len(), 1);
        assert_eq!(roster.member[0].name, "Cole");
    }

    #[test]
    fn test_member_fields_are_sanitized() {
        let mut u = user(1, "<i>Pia</i>", Some("President"));
        u.image_path = Some("javascript:alert(1)".to_string());

        let roster = CommitteeRoster::from_users(&[u]);
        let member = &roster.leadership[0].member;
        assert_eq!(member.name, "Pia");
        assert_eq!(member.image_path, None);
    }

    #[test]
    fn test_roster_json_shape() {
        let roster = CommitteeRoster::from_users(&[user(3, "Pia", Some("President"))]);
        let json = serde_json::to_value(&roster).unwrap();
        assert_eq!(json["leadership"][0]["role"], "President");
        assert_eq!(json["leadership"][0]["member"]["imagePath"], "/uploads/3.png");
        assert!(json["member"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_public_roster_omits_email() {
        let roster = CommitteeRoster::from_users(&[
            user(3, "Pia", Some("President")),
            user(2, "Cole", Some(COMMITTEE_MEMBER_ROLE)),
        ]);
        let json = serde_json::to_value(PublicRoster::from(&roster)).unwrap();

        let pia = &json["leadership"][0]["member"];
        assert_eq!(pia["name"], "Pia");
        assert_eq!(pia["id"], 3);
        assert_eq!(pia["imagePath"], "/uploads/3.png");
        assert!(pia.get("email").is_none());
        assert!(json["member"][0].get("email").is_none());
    }

    #[test]
    fn test_assignable_roles() {
        assert!(is_assignable_role("Club Manager"));
        assert!(is_assignable_role(COMMITTEE_MEMBER_ROLE));
        assert!(!is_assignable_role("Admin"));
    }
}
