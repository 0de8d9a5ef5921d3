mod queue_tests;
mod retry_tests;
mod worker_tests;
