/// Classification of a resolution failure.
///
/// Used to determine how the engine responds to errors while walking the
/// provider chain.
///
/// # Behavior Summary
///
/// | Class | Try Next Tier? | Record Circuit Breaker Failure? |
/// |-------|---------------|--------------------------------|
/// | `Caller` | No (returned to the consumer) | No |
/// | `Penalty` | Yes | Yes (affects future requests) |
/// | `NoPenalty` | Yes | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// The request itself was invalid.
    ///
    /// Resolution never starts; the error is returned to the caller.
    /// This is the only class a consumer of the engine can observe,
    /// because everything else ends at the static fallback table.
    Caller,

    /// The provider was called and misbehaved.
    ///
    /// Timeouts, rate limiting, undecodable payloads, and transport
    /// failures all land here. The failure is recorded in the circuit
    /// breaker, which may cause this provider to be skipped entirely
    /// once failures accumulate past the threshold.
    Penalty,

    /// Nothing to hold against the provider.
    ///
    /// Either the provider was never called (circuit already open), or
    /// it answered honestly that it cannot help (symbol unknown). The
    /// next tier is attempted with the provider's health untouched.
    NoPenalty,
}
