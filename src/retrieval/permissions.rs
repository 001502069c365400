//! Permission resolver
//!
//! The sole access-control enforcement point for retrieval. The vector
//! backend takes a native disjunctive role filter; the keyword backend cannot
//! express one, so its hits are post-filtered here before anything downstream
//! sees them. Ingestion stamps `access_roles` through the same module so both
//! sides of the invariant live in one place.

use crate::auth::UserContext;
use crate::index::RoleFilter;
use crate::retrieval::{Candidate, Classification};

/// Distinguished role granting unconditional visibility
pub const ADMIN_ROLE: &str = "Admin";

/// The full role set; public chunks are visible to all of these
pub const ALL_ROLES: [&str; 5] = ["Employee", "HR", "Engineer", "Sales", "Admin"];

/// Map a department name to the role that unlocks its restricted documents
pub fn department_to_role(department: &str) -> &'static str {
    match department {
        "HR" => "HR",
        "Engineering" => "Engineer",
        "Sales" => "Sales",
        _ => "Employee",
    }
}

/// Roles entitled to see a chunk, derived at ingestion time from its
/// classification and department
pub fn access_roles_for(classification: Classification, department: &str) -> Vec<String> {
    match classification {
        Classification::Public => ALL_ROLES.iter().map(|r| r.to_string()).collect(),
        Classification::Restricted => vec![
            department_to_role(department).to_string(),
            ADMIN_ROLE.to_string(),
        ],
    }
}

/// Native filter for the vector backend: `None` for Admin (unrestricted),
/// otherwise "access_roles intersects the user's roles"
pub fn build_vector_filter(user: &UserContext) -> Option<RoleFilter> {
    if user.roles.iter().any(|r| r == ADMIN_ROLE) {
        return None;
    }

    Some(RoleFilter {
        any_of: user.roles.clone(),
    })
}

/// Post-filter for keyword hits.
///
/// Admin passes every hit unchanged. Otherwise public hits always pass and
/// restricted hits pass only when the user holds the hit department's role.
pub fn filter_keyword_hits(hits: Vec<Candidate>, user: &UserContext) -> Vec<Candidate> {
    if user.roles.iter().any(|r| r == ADMIN_ROLE) {
        return hits;
    }

    hits.into_iter()
        .filter(|hit| match hit.classification {
            Classification::Public => true,
            Classification::Restricted => {
                let required = department_to_role(&hit.department);
                user.roles.iter().any(|r| r == required)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::RetrievalSource;

    fn user(department: &str, roles: &[&str]) -> UserContext {
        UserContext {
            user_id: "u".to_string(),
            email: "u@corp.test".to_string(),
            department: department.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn hit(department: &str, classification: Classification) -> Candidate {
        Candidate::new(
            "text",
            "doc",
            "title",
            department,
            classification,
            Some(0),
            RetrievalSource::Keyword,
            1.0,
        )
    }

    #[test]
    fn admin_gets_no_vector_filter() {
        let filter = build_vector_filter(&user("Engineering", &["Employee", "Admin"]));
        assert!(filter.is_none());
    }

    #[test]
    fn non_admin_filter_carries_all_roles() {
        let filter = build_vector_filter(&user("HR", &["Employee", "HR"])).unwrap();
        assert_eq!(filter.any_of, vec!["Employee".to_string(), "HR".to_string()]);
    }

    #[test]
    fn admin_passes_every_keyword_hit() {
        let hits = vec![
            hit("HR", Classification::Restricted),
            hit("Sales", Classification::Restricted),
            hit("Engineering", Classification::Public),
        ];

        let kept = filter_keyword_hits(hits, &user("Engineering", &["Admin"]));
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn public_is_visible_to_any_role_set() {
        for roles in [&["Employee"][..], &["Engineer"][..], &[][..]] {
            let kept = filter_keyword_hits(
                vec![hit("HR", Classification::Public)],
                &user("Sales", roles),
            );
            assert_eq!(kept.len(), 1);
        }
    }

    #[test]
    fn restricted_requires_department_role() {
        let sales_doc = vec![hit("Sales", Classification::Restricted)];

        let kept = filter_keyword_hits(sales_doc.clone(), &user("Sales", &["Employee", "Sales"]));
        assert_eq!(kept.len(), 1);

        let kept = filter_keyword_hits(sales_doc, &user("Engineering", &["Employee", "Engineer"]));
        assert!(kept.is_empty());
    }

    #[test]
    fn unknown_department_maps_to_employee_role() {
        assert_eq!(department_to_role("Finance"), "Employee");

        let kept = filter_keyword_hits(
            vec![hit("Finance", Classification::Restricted)],
            &user("Finance", &["Employee"]),
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn access_roles_match_classification() {
        assert_eq!(
            access_roles_for(Classification::Public, "Sales").len(),
            ALL_ROLES.len()
        );
        assert_eq!(
            access_roles_for(Classification::Restricted, "Engineering"),
            vec!["Engineer".to_string(), "Admin".to_string()]
        );
    }
}
