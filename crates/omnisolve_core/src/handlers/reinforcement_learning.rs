use crate::traits::Handler;
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

pub type Cell = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
}

const ACTIONS: [Action; 4] = [Action::Up, Action::Down, Action::Left, Action::Right];

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QLearningSettings {
    pub episodes: usize,
    pub max_steps: usize,
    /// Learning rate.
    pub alpha: f64,
    /// Discount factor.
    pub gamma: f64,
    /// Exploration probability.
    pub epsilon: f64,
    pub step_reward: f64,
    pub goal_reward: f64,
    pub seed: u64,
}

impl Default for QLearningSettings {
    fn default() -> Self {
        Self {
            episodes: 500,
            max_steps: 100,
            alpha: 0.1,
            gamma: 0.95,
            epsilon: 0.1,
            step_reward: -0.01,
            goal_reward: 1.0,
            seed: 42,
        }
    }
}

fn default_side() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridWorldInput {
    #[serde(default = "default_side")]
    pub rows: usize,
    #[serde(default = "default_side")]
    pub cols: usize,
    #[serde(default)]
    pub start: Cell,
    /// Defaults to the bottom-right corner.
    #[serde(default)]
    pub goal: Option<Cell>,
    #[serde(default)]
    pub walls: Vec<Cell>,
    #[serde(default)]
    pub settings: QLearningSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridWorldOutput {
    /// Row-major over cells, one value per action in `up, down, left, right` order.
    pub q_table: Vec<[f64; 4]>,
    /// Greedy action per cell; `None` for walls and the goal.
    pub policy: Vec<Option<Action>>,
    /// Cells visited by the greedy policy from `start`.
    pub greedy_path: Vec<Cell>,
    pub reached_goal: bool,
}

struct GridWorld {
    rows: usize,
    cols: usize,
    goal: Cell,
    walls: HashSet<Cell>,
}

impl GridWorld {
    fn index(&self, (r, c): Cell) -> usize {
        r * self.cols + c
    }

    /// Moving off the grid or into a wall leaves the agent in place.
    fn step(&self, (r, c): Cell, action: Action) -> Cell {
        let next = match action {
            Action::Up if r > 0 => (r - 1, c),
            Action::Down if r + 1 < self.rows => (r + 1, c),
            Action::Left if c > 0 => (r, c - 1),
            Action::Right if c + 1 < self.cols => (r, c + 1),
            _ => (r, c),
        };
        if self.walls.contains(&next) {
            (r, c)
        } else {
            next
        }
    }
}

/// Tabular Q-learning with epsilon-greedy exploration on a grid world.
pub struct ReinforcementLearning;

impl Handler for ReinforcementLearning {
    const LABEL: &'static str = "reinforcement_learning";
    const PARAMETERS: &'static [&'static str] =
        &["rows", "cols", "start", "goal", "walls", "settings"];

    type Input = GridWorldInput;
    type Output = GridWorldOutput;

    fn run(&self, input: GridWorldInput) -> Result<GridWorldOutput> {
        let settings = input.settings;
        if input.rows == 0 || input.cols == 0 {
            bail!("grid must have at least one row and one column.");
        }
        let goal = input.goal.unwrap_or((input.rows - 1, input.cols - 1));
        let world = GridWorld {
            rows: input.rows,
            cols: input.cols,
            goal,
            walls: input.walls.iter().copied().collect(),
        };
        for (name, cell) in [("start", input.start), ("goal", goal)] {
            if cell.0 >= world.rows || cell.1 >= world.cols {
                bail!("{} {:?} lies outside the {}x{} grid.", name, cell, world.rows, world.cols);
            }
            if world.walls.contains(&cell) {
                bail!("{} {:?} is a wall.", name, cell);
            }
        }
        if !(0.0..=1.0).contains(&settings.gamma) || !(0.0..=1.0).contains(&settings.epsilon) {
            bail!("gamma and epsilon must lie in [0, 1].");
        }

        let mut rng = StdRng::seed_from_u64(settings.seed);
        let mut q = vec![[0.0f64; 4]; world.rows * world.cols];

        for _ in 0..settings.episodes {
            let mut state = input.start;
            for _ in 0..settings.max_steps {
                if state == world.goal {
                    break;
                }
                let s = world.index(state);
                let a = if rng.gen::<f64>() < settings.epsilon {
                    rng.gen_range(0..ACTIONS.len())
                } else {
                    greedy(&q[s], &mut rng)
                };
                let next = world.step(state, ACTIONS[a]);
                let (reward, future) = if next == world.goal {
                    (settings.goal_reward, 0.0)
                } else {
                    let best = q[world.index(next)].iter().copied().fold(f64::MIN, f64::max);
                    (settings.step_reward, best)
                };
                let td_error = reward + settings.gamma * future - q[s][a];
                q[s][a] += settings.alpha * td_error;
                state = next;
            }
        }

        let policy = (0..world.rows)
            .flat_map(|r| (0..world.cols).map(move |c| (r, c)))
            .map(|cell| {
                if cell == world.goal || world.walls.contains(&cell) {
                    None
                } else {
                    Some(ACTIONS[first_max(&q[world.index(cell)])])
                }
            })
            .collect();

        let mut greedy_path = vec![input.start];
        let mut state = input.start;
        while state != world.goal && greedy_path.len() <= world.rows * world.cols {
            state = world.step(state, ACTIONS[first_max(&q[world.index(state)])]);
            greedy_path.push(state);
        }
        let reached_goal = state == world.goal;
        debug!(reached_goal, path_len = greedy_path.len(), "q-learning finished");

        Ok(GridWorldOutput {
            q_table: q,
            policy,
            greedy_path,
            reached_goal,
        })
    }
}

fn first_max(values: &[f64; 4]) -> usize {
    crate::util::argmax(values.iter())
}

/// Greedy action with ties broken uniformly at random.
fn greedy(values: &[f64; 4], rng: &mut StdRng) -> usize {
    let best = values.iter().copied().fold(f64::MIN, f64::max);
    let ties: Vec<usize> = (0..values.len()).filter(|&i| values[i] == best).collect();
    ties[rng.gen_range(0..ties.len())]
}
