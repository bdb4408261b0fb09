/*!
# Pico Monitor DevKit - fakes and helpers for exercising the telemetry loop

Test doubles for every collaborator of the orchestrator:
- Scripted link, session and sensor fakes sharing one call log
- A restarter that records instead of re-executing
- A harness wiring them together without hardware or broker
*/

pub mod link_stub;
pub mod sensor_stub;
pub mod session_stub;
pub mod test_utils;

pub use link_stub::FakeLink;
pub use sensor_stub::{FakeSensors, SensorScript};
pub use session_stub::FakeSession;
pub use test_utils::{Call, CallLog, FakeRestarter, TestHarness};
