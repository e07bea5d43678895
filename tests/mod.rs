mod support;

mod idempotency_tests;
mod resolver_tests;
mod retry_tests;
