#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentLifecycle {
    New,
    Registered,
    Running,
    Stopped,
}
