//! Platform Abstraction Layer (PAL). This is private API: everything the
//! core needs from the operating system flows through the traits defined
//! here, so unit tests can substitute fakes or mocks for the real OS.

mod abstractions;
pub(crate) use abstractions::*;

mod facade;
pub(crate) use facade::*;

#[cfg(any(test, feature = "test-util"))]
mod fake;
#[cfg(any(test, feature = "test-util"))]
pub(crate) use fake::*;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub(crate) use linux::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::*;

#[cfg(target_os = "aix")]
mod aix;
#[cfg(target_os = "aix")]
pub(crate) use aix::*;

// The fallback module is compiled in test mode on all platforms, and as the
// primary implementation on unsupported platforms. On supported platforms in
// test mode it must be accessed via the explicit path `fallback::` to avoid
// ambiguity with the platform-specific implementation.
#[cfg(any(test, not(any(target_os = "linux", windows, target_os = "aix"))))]
pub(crate) mod fallback;

#[cfg(not(any(target_os = "linux", windows, target_os = "aix")))]
pub(crate) use fallback::*;

#[cfg(test)]
mod mocks;
#[cfg(test)]
pub(crate) use mocks::*;
