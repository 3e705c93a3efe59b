/// Decide, then apply, in one step (no IO).
///
/// Calls `aggregate.handle(command)`; if it succeeds every decided event is
/// applied in order and returned. If it fails the aggregate is untouched.
///
/// Persistence and publication are the job of the infra layer
/// (`CommandDispatcher`, `StockLedger`); this is for inline processing and tests.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: storefront_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
