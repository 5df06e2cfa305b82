/// # NDOC
/// component: `subsystems`
/// purpose: High-level domain subsystem boundary. `mail_trace` owns the
///   end-to-end ingest -> normalize -> match -> aggregate pipeline.
/// invariants:
///   - Subsystems own domain contracts and orchestration, not transport.
pub mod mail_trace;
