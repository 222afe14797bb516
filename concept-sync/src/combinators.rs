//! Reusable `where` refinements.
//!
//! Most rules that mutate an owned resource authorise the request the
//! same way: look up the resource's owner, look up whether the acting
//! user is an administrator, and keep the frame only if the user is
//! either.  `require_owner_or_admin` is that sequence as a single
//! refinement step, so a rule says
//!
//! ```ignore
//! SyncRule::builder("UpdateMenuRequest")
//!     .when(Pattern::new("Requesting", "request").input(template! {
//!         "path" => "/MenuCollection/updateMenu", "menu" => &menu, "session" => &session,
//!     }))
//!     .filter(move |frame| has_session(frame, &session))
//!     .refine(require_owner_or_admin(
//!         OwnerLookup::new(
//!             "MenuCollection",
//!             "_getMenuDetails",
//!             template! { "menu" => &menu },
//!             &owner,
//!         ),
//!         AdminLookup::new("UserAuthentication", "_getIsUserAdmin", &session, &is_admin),
//!     ))
//!     .then(Pattern::new("MenuCollection", "updateMenu").input(template! { "menu" => &menu }))
//! ```
//!
//! The session helpers cover the other half of the idiom: rules that
//! require a session, and the matching error rules that fire when it
//! is missing.
use crate::execution::Concepts;
use crate::ground::Value;
use crate::matching::Frames;
use crate::unification::{Frame, Template, VariableId};
use futures_util::future::{BoxFuture, FutureExt};
use std::sync::Arc;

/// Where to find the owner of the resource a frame refers to.
#[derive(Clone, Debug)]
pub struct OwnerLookup {
    pub concept: String,
    pub query: String,
    /// Instantiated with each frame to form the query input.
    pub input: Template,
    /// The output field holding the owner.
    pub field: String,
    /// Bound to the owner.
    pub owner: VariableId,
}

impl OwnerLookup {
    #[must_use]
    pub fn new(concept: &str, query: &str, input: Template, owner: &VariableId) -> Self {
        Self {
            concept: concept.into(),
            query: query.into(),
            input,
            field: "owner".into(),
            owner: owner.clone(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: &str) -> Self {
        self.field = field.into();
        self
    }
}

/// Where to find whether the acting user is an administrator.
#[derive(Clone, Debug)]
pub struct AdminLookup {
    pub concept: String,
    pub query: String,
    /// The variable holding the acting user.
    pub user: VariableId,
    pub input_field: String,
    pub output_field: String,
    /// Bound to the administrator flag.
    pub is_admin: VariableId,
}

impl AdminLookup {
    #[must_use]
    pub fn new(concept: &str, query: &str, user: &VariableId, is_admin: &VariableId) -> Self {
        Self {
            concept: concept.into(),
            query: query.into(),
            user: user.clone(),
            input_field: "user".into(),
            output_field: "isAdmin".into(),
            is_admin: is_admin.clone(),
        }
    }

    #[must_use]
    pub fn fields(mut self, input: &str, output: &str) -> Self {
        self.input_field = input.into();
        self.output_field = output.into();
        self
    }
}

/// Returns a refinement step that keeps the frames whose acting user
/// owns the resource or is an administrator.  Frames are dropped if
/// either lookup fails or returns nothing.
pub fn require_owner_or_admin(
    owner: OwnerLookup,
    admin: AdminLookup,
) -> impl Fn(Frames, Arc<Concepts>) -> BoxFuture<'static, anyhow::Result<Frames>>
       + Send
       + Sync
       + 'static
{
    let owner = Arc::new(owner);
    let admin = Arc::new(admin);

    move |frames, concepts| {
        let owner = Arc::clone(&owner);
        let admin = Arc::clone(&admin);
        async move { owner_or_admin(frames, &concepts, &owner, &admin).await }.boxed()
    }
}

/// The body of [`require_owner_or_admin`], for `where` clauses that
/// do more than authorise.
///
/// # Errors
///
/// Returns `Err` if a lookup names an unknown concept or faults.
pub async fn owner_or_admin(
    frames: Frames,
    concepts: &Concepts,
    owner: &OwnerLookup,
    admin: &AdminLookup,
) -> anyhow::Result<Frames> {
    let owners = concepts.query(&owner.concept, &owner.query)?;
    let frames = frames
        .query(
            &owners,
            &owner.input,
            &Template::new().with(&owner.field, &owner.owner),
        )
        .await?
        .filter(|frame| frame.get(&owner.owner).map_or(false, Value::is_non_empty_str));
    if frames.is_empty() {
        return Ok(frames);
    }

    let admins = concepts.query(&admin.concept, &admin.query)?;
    let frames = frames
        .query(
            &admins,
            &Template::new().with(&admin.input_field, &admin.user),
            &Template::new().with(&admin.output_field, &admin.is_admin),
        )
        .await?;

    Ok(frames.filter(|frame| {
        let is_admin = match frame.get(&admin.is_admin).and_then(Value::as_bool) {
            Some(is_admin) => is_admin,
            None => return false,
        };

        is_admin || frame.get(&owner.owner) == frame.get(&admin.user)
    }))
}

/// True if `session` is bound to a non-empty string in `frame`.
#[must_use]
pub fn has_session(frame: &Frame, session: &VariableId) -> bool {
    frame.get(session).map_or(false, Value::is_non_empty_str)
}

/// Keeps the frames that carry a session.
#[must_use]
pub fn require_session(frames: Frames, session: &VariableId) -> Frames {
    frames.filter(|frame| has_session(frame, session))
}

/// Keeps the frames that do not carry a session, for rules that
/// respond with an authentication error.
#[must_use]
pub fn missing_session(frames: Frames, session: &VariableId) -> Frames {
    frames.filter(|frame| !has_session(frame, session))
}

#[cfg(test)]
fn authorization_concepts() -> Concepts {
    use crate::execution::FnConcept;
    use crate::ground::{Outcome, QueryOutcome, Record};
    use crate::record;

    let menus = FnConcept::new("MenuCollection").query("_getMenuDetails", |input: Record| {
        async move {
            let outcome: QueryOutcome = match input.get("menu").and_then(Value::as_str) {
                Some("m1") => {
                    Outcome::Done(vec![record! { "name" => "Week 1", "owner" => "alice" }])
                }
                _ => Outcome::failed("menu not found"),
            };
            Ok::<_, anyhow::Error>(outcome)
        }
    });
    let auth = FnConcept::new("UserAuthentication").query("_getIsUserAdmin", |input: Record| {
        async move {
            let outcome: QueryOutcome = match input.get("user").and_then(Value::as_str) {
                Some("root") => Outcome::Done(vec![record! { "isAdmin" => true }]),
                Some("ghost") => Outcome::failed("user not found"),
                _ => Outcome::Done(vec![record! { "isAdmin" => false }]),
            };
            Ok::<_, anyhow::Error>(outcome)
        }
    });

    let mut concepts = Concepts::new();
    concepts.register(menus).expect("ok");
    concepts.register(auth).expect("ok");
    concepts
}

#[tokio::test]
async fn test_owner_or_admin() {
    use crate::template;

    let [menu, session, owner, is_admin] = crate::vars(["menu", "session", "owner", "isAdmin"]);
    let step = require_owner_or_admin(
        OwnerLookup::new(
            "MenuCollection",
            "_getMenuDetails",
            template! { "menu" => &menu },
            &owner,
        ),
        AdminLookup::new("UserAuthentication", "_getIsUserAdmin", &session, &is_admin),
    );

    let frames: Frames = [
        ("m1", "alice"),
        ("m1", "root"),
        ("m1", "bob"),
        ("m1", "ghost"),
        ("m2", "alice"),
    ]
    .iter()
    .map(|(m, s)| Frame::new().with(&menu, *m).with(&session, *s))
    .collect();

    let kept = step(frames, Arc::new(authorization_concepts()))
        .await
        .expect("ok");
    let users: Vec<_> = kept
        .iter()
        .filter_map(|frame| frame.get(&session).and_then(Value::as_str).map(String::from))
        .collect();
    assert_eq!(users, vec!["alice".to_string(), "root".to_string()]);

    let root = kept.iter().nth(1).expect("root frame");
    assert_eq!(root.get(&owner), Some(&Value::from("alice")));
    assert_eq!(root.get(&is_admin), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn test_owner_or_admin_unknown_concept() {
    use crate::template;

    let [menu, session, owner, is_admin] = crate::vars(["menu", "session", "owner", "isAdmin"]);
    let frames = Frames::single(Frame::new().with(&menu, "m1").with(&session, "alice"));
    let result = owner_or_admin(
        frames,
        &Concepts::new(),
        &OwnerLookup::new("Nowhere", "_q", template! { "menu" => &menu }, &owner),
        &AdminLookup::new("UserAuthentication", "_getIsUserAdmin", &session, &is_admin),
    )
    .await;
    assert!(result.is_err());
}

#[test]
fn test_session_filters() {
    let [session, other] = crate::vars(["session", "other"]);
    let frames = || -> Frames {
        vec![
            Frame::new().with(&session, "s1"),
            Frame::new().with(&session, ""),
            Frame::new().with(&session, Value::Absent),
            Frame::new().with(&other, "s2"),
        ]
        .into()
    };

    assert_eq!(require_session(frames(), &session).len(), 1);
    assert_eq!(missing_session(frames(), &session).len(), 3);
}
