//! Lightweight no_std test harness.
//!
//! Pure-logic modules (ring buffer, timer wheel arithmetic, address table)
//! are covered by ordinary `#[cfg(test)] extern crate std;` unit tests
//! elsewhere in this workspace. This harness is for the handful of tests
//! that want a `TestResult`-returning, early-`return`-on-failure style —
//! e.g. end-to-end scenarios that chain several fallible steps and read
//! better as a flat sequence of `assert_*_test!` calls than as a chain of
//! `?`.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
}

impl TestResult {
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

/// Run a `TestResult`-returning test function and report to klog on failure.
pub fn run_single_test(name: &str, test_fn: impl FnOnce() -> TestResult) -> TestResult {
    let result = test_fn();
    if result.is_failure() {
        crate::klog_info!("TEST FAIL: {}", name);
    }
    result
}

#[macro_export]
macro_rules! pass {
    () => {
        $crate::testing::TestResult::Pass
    };
}

#[macro_export]
macro_rules! fail {
    () => {
        $crate::testing::TestResult::Fail
    };
    ($msg:expr) => {{
        $crate::klog_info!("TEST FAIL: {}", $msg);
        $crate::testing::TestResult::Fail
    }};
}

#[macro_export]
macro_rules! run_test {
    ($test_fn:expr) => {{ $crate::testing::run_single_test(stringify!($test_fn), || $test_fn()) }};
    ($name:expr, $test_fn:expr) => {{ $crate::testing::run_single_test($name, || $test_fn()) }};
}

#[macro_export]
macro_rules! assert_eq_test {
    ($left:expr, $right:expr) => {{
        let left = $left;
        let right = $right;
        if left != right {
            $crate::klog_info!("ASSERT_EQ: expected {:?}, got {:?}", right, left);
            return $crate::testing::TestResult::Fail;
        }
    }};
    ($left:expr, $right:expr, $msg:expr) => {{
        let left = $left;
        let right = $right;
        if left != right {
            $crate::klog_info!("ASSERT_EQ: {} - expected {:?}, got {:?}", $msg, right, left);
            return $crate::testing::TestResult::Fail;
        }
    }};
}

#[macro_export]
macro_rules! assert_test {
    ($cond:expr) => {{
        if !$cond {
            $crate::klog_info!("ASSERT: condition failed");
            return $crate::testing::TestResult::Fail;
        }
    }};
    ($cond:expr, $msg:expr) => {{
        if !$cond {
            $crate::klog_info!("ASSERT: {}", $msg);
            return $crate::testing::TestResult::Fail;
        }
    }};
}

#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {{
        match $result {
            Ok(v) => v,
            Err(e) => {
                $crate::klog_info!("ASSERT_OK: got Err({:?})", e);
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
}

#[macro_export]
macro_rules! assert_err_test {
    ($result:expr, $kind:pat) => {{
        match $result {
            Err($kind) => {}
            other => {
                $crate::klog_info!("ASSERT_ERR: unexpected result {:?}", other.is_ok());
                return $crate::testing::TestResult::Fail;
            }
        }
    }};
}
