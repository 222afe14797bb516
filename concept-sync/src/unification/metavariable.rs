use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// A variable of a sync rule, such as the `menu` a `when` pattern
/// captures from a request and a `then` pattern passes on.
///
/// A rule gets its variables from [`vars`] and shares them between
/// its clauses by reference.  Identity is the allocation sequence, so
/// `request` in one rule and `request` in another never unify; the
/// name is only for display.
///
/// Frames key their bindings by variable, and variables sort in
/// allocation order, so a frame logs its bindings in the order the
/// rule declared them.
#[derive(Clone, Debug, Eq)]
pub struct VariableId {
    sequence: usize,
    name: String,
}

impl VariableId {
    /// Allocates a variable called `name`, distinct from every
    /// variable allocated before it.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
        }
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Allocates one variable per name, in order, for destructuring at
/// the top of a rule definition.
///
/// ```
/// let [menu, date] = concept_sync::vars(["menu", "date"]);
/// assert_ne!(menu, date);
/// ```
#[must_use]
pub fn vars<const N: usize>(names: [&str; N]) -> [VariableId; N] {
    names.map(VariableId::new)
}

impl std::fmt::Display for VariableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.sequence)
    }
}

impl std::hash::Hash for VariableId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.sequence.hash(state);
    }
}

impl PartialEq for VariableId {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl PartialOrd for VariableId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VariableId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence.cmp(&other.sequence)
    }
}

#[test]
fn test_smoke() {
    let v0 = VariableId::new("menu");
    let v1 = VariableId::new("cart");

    assert!(v0 < v1);
    assert_ne!(v0, v1);
    assert_eq!(v0.name(), "menu");
}

#[test]
fn test_same_name_distinct() {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::Hash;
    use std::hash::Hasher;

    let v0 = VariableId::new("request");
    let v0_clone = v0.clone();
    // Same name, different rule: must not unify.
    let v1 = VariableId::new("request");

    assert_eq!(v0, v0_clone);
    assert_ne!(v0, v1);

    let mut h0 = DefaultHasher::new();
    let mut h0_clone = DefaultHasher::new();
    v0.hash(&mut h0);
    v0_clone.hash(&mut h0_clone);
    assert_eq!(h0.finish(), h0_clone.finish());
}

#[test]
fn test_vars() {
    let [a, b, c] = vars(["a", "b", "c"]);
    assert!(a < b && b < c);
    assert_eq!(c.to_string().split('#').next(), Some("c"));
}
