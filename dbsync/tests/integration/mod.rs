mod batch_test;
mod incremental_test;
mod manager_test;
mod refresh_test;
mod support;
mod verifier_test;
