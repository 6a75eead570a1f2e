use somnia_runtime::GameEngine;

#[derive(Clone)]
pub struct GlobalState {
    pub engine: GameEngine,
}

impl GlobalState {
    pub fn new(engine: GameEngine) -> Self {
        Self { engine }
    }
}
