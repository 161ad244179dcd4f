mod common;
mod test_canary;
mod test_executor;
mod test_fsm;
mod test_pool;
mod test_resilience;
mod test_server;
mod test_state;
