//! Parse tests generated by build.rs: one per report descriptor dump
//! in tests/data.

include!(concat!(env!("OUT_DIR"), "/test-report-descriptors.rs"));
