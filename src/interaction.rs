//! Fall and reset transitions driven by the two UI triggers.

use std::time::Duration;

use log::{debug, info};
use rand::Rng;

use crate::context::{SceneContext, TimerTask};
use crate::scheduler::TaskHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InteractionState {
    /// Rotating, fire at its baseline visibility.
    #[default]
    Idle,
    /// Fall actions playing or held, rotation stopped.
    Fallen,
    /// Glitch engaged, waiting for the reset cut.
    Resetting,
}

/// Whether a trigger changed the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Ignored,
}

/// The reset continuation waiting on the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReset {
    pub handle: TaskHandle,
    pub due: Duration,
    pub resume: InteractionState,
}

impl SceneContext {
    /// Toggles between the idle and fallen poses.
    ///
    /// Falling resumes every fall action from where it stopped. Leaving the
    /// fallen pose this way restores visibility and rotation but leaves the
    /// actions where they are.
    pub fn trigger_fall(&mut self, now: Duration) -> Transition {
        match self.interaction {
            InteractionState::Idle => {
                self.animations.play_fall();
                self.set_fire_pose(true);
                self.rotation_enabled = false;
                self.interaction = InteractionState::Fallen;
                info!(
                    "fall at {now:?}: {} action(s) playing",
                    self.animations.fall_count()
                );
                Transition::Applied
            }
            InteractionState::Fallen => {
                self.set_fire_pose(false);
                self.rotation_enabled = true;
                self.interaction = InteractionState::Idle;
                info!("fall toggled back to idle at {now:?}");
                Transition::Applied
            }
            InteractionState::Resetting => {
                debug!("fall ignored at {now:?}: reset in progress");
                Transition::Ignored
            }
        }
    }

    /// Engages the glitch and schedules the reset cut after a random wait.
    pub fn trigger_reset(&mut self, now: Duration) -> Transition {
        if self.interaction == InteractionState::Resetting {
            debug!("reset ignored at {now:?}: reset already pending");
            return Transition::Ignored;
        }
        self.glitch.begin_pulse();
        let millis = self.rng.gen_range(self.settings.reset_wait_ms.clone());
        let due = now + Duration::from_secs_f32(millis / 1000.0);
        let handle = self.scheduler.schedule_once(due, TimerTask::CompleteReset);
        self.pending_reset = Some(PendingReset {
            handle,
            due,
            resume: self.interaction,
        });
        self.interaction = InteractionState::Resetting;
        info!("reset at {now:?}, cut at {due:?}");
        Transition::Applied
    }

    /// When the pending reset cut is due, if any.
    pub fn pending_reset(&self) -> Option<Duration> {
        self.pending_reset.map(|pending| pending.due)
    }

    /// The reset cut. Pose, visibility and rotation change while the glitch
    /// pulse is still held; the pulse is released last.
    pub(crate) fn complete_reset(&mut self) {
        if self.interaction != InteractionState::Resetting {
            return;
        }
        self.pending_reset = None;
        self.animations.reset_fall();
        self.set_fire_pose(false);
        self.rotation_enabled = true;
        self.glitch.end_pulse();
        self.interaction = InteractionState::Idle;
        debug!("reset complete");
    }

    /// Drops a pending reset without applying it, returning to the state the
    /// reset started from.
    pub fn cancel_pending_reset(&mut self) -> bool {
        let Some(pending) = self.pending_reset.take() else {
            return false;
        };
        self.scheduler.cancel(pending.handle);
        self.glitch.end_pulse();
        self.interaction = pending.resume;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::fixture;
    use crate::error::Layer;

    fn visibility(context: &SceneContext) -> Vec<bool> {
        context
            .fire_children()
            .iter()
            .map(|child| context.graph(child.layer).node(child.node).visible)
            .collect()
    }

    #[test]
    fn fall_plays_every_fall_action_and_inverts_fire() {
        let mut context = fixture::context(1);
        let before = visibility(&context);
        assert_eq!(context.trigger_fall(Duration::ZERO), Transition::Applied);
        assert_eq!(context.state(), InteractionState::Fallen);
        assert!(!context.rotation_enabled());
        assert!(context
            .animations()
            .fall_actions()
            .all(|action| action.is_active() && !action.paused()));
        let after = visibility(&context);
        assert!(before.iter().zip(&after).all(|(a, b)| a != b));
    }

    #[test]
    fn double_fall_restores_visibility_but_not_pose() {
        let mut context = fixture::context(1);
        let before = visibility(&context);
        context.trigger_fall(Duration::ZERO);
        context.advance_animations(Duration::from_millis(500));
        context.trigger_fall(Duration::from_millis(500));

        assert_eq!(visibility(&context), before);
        assert!(context.rotation_enabled());
        assert!(context
            .animations()
            .fall_actions()
            .all(|action| action.time() > 0.0));
    }

    #[test]
    fn reset_holds_glitch_until_the_cut() {
        let mut context = fixture::context(9);
        context.trigger_fall(Duration::ZERO);
        context.advance_animations(Duration::from_secs(1));

        let start = Duration::from_secs(1);
        assert_eq!(context.trigger_reset(start), Transition::Applied);
        let due = context.pending_reset().unwrap();
        let wait = due - start;
        assert!(wait >= Duration::from_millis(1) && wait < Duration::from_millis(801));
        assert!(context.glitch().enabled());

        context.run_timers(due - Duration::from_micros(500));
        assert_eq!(context.state(), InteractionState::Resetting);
        assert!(context.glitch().enabled());

        context.run_timers(due);
        assert_eq!(context.state(), InteractionState::Idle);
        assert!(!context.glitch().enabled());
        assert!(context.rotation_enabled());
        assert!(context
            .animations()
            .fall_actions()
            .all(|action| action.paused() && action.time() == 0.0));
    }

    #[test]
    fn triggers_are_ignored_while_resetting() {
        let mut context = fixture::context(4);
        context.trigger_reset(Duration::ZERO);
        let due = context.pending_reset();
        assert_eq!(context.trigger_fall(Duration::ZERO), Transition::Ignored);
        assert_eq!(context.trigger_reset(Duration::ZERO), Transition::Ignored);
        assert_eq!(context.pending_reset(), due);
    }

    #[test]
    fn reset_from_fallen_restores_baseline_fire() {
        let mut context = fixture::context(6);
        let before = visibility(&context);
        context.trigger_fall(Duration::ZERO);
        context.trigger_reset(Duration::ZERO);
        context.run_timers(Duration::from_secs(1));
        assert_eq!(visibility(&context), before);
        let shadow_fire = context
            .fire_children()
            .iter()
            .filter(|child| child.layer == Layer::Shadow)
            .count();
        assert!(shadow_fire > 0);
    }

    #[test]
    fn cancelled_reset_never_cuts() {
        let mut context = fixture::context(8);
        context.trigger_fall(Duration::ZERO);
        context.trigger_reset(Duration::ZERO);
        assert!(context.cancel_pending_reset());
        assert!(!context.cancel_pending_reset());
        assert_eq!(context.state(), InteractionState::Fallen);
        assert!(!context.glitch().enabled());

        context.run_timers(Duration::from_secs(2));
        assert_eq!(context.state(), InteractionState::Fallen);
        assert!(context.animations().fall_actions().all(|action| !action.paused()));
    }
}
