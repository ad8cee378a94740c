/// Source of names for generated files. Every call yields a distinct value.
#[mockall::automock]
pub trait IdGenerator: std::fmt::Debug + Send + Sync {
    fn next_id(&self) -> String;
}
