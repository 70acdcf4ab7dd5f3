// tests/scheduler.rs

use taskdeck::scheduler::{NodeHandle, Scheduler, Step, Work};
use taskdeck_test_utils::init_tracing;

#[derive(Default)]
struct Ctx {
    log: Vec<String>,
    children: Vec<NodeHandle>,
}

fn log(msg: &'static str) -> Work<Ctx> {
    Box::new(move |_, _, ctx| {
        ctx.log.push(msg.to_string());
        Step::Done
    })
}

fn suspending_child() -> Work<Ctx> {
    Box::new(|_, me, ctx| {
        ctx.children.push(me);
        Step::Suspend
    })
}

#[test]
fn finished_root_frees_its_slot_for_reuse() {
    init_tracing();
    let mut sched = Scheduler::new();
    let mut ctx = Ctx::default();

    let first = sched.schedule(log("first"), None);
    sched.tick(&mut ctx);

    assert!(!sched.is_live(first));
    assert_eq!(sched.live_count(), 0);

    let second = sched.schedule(log("second"), None);
    assert_eq!(second.index(), first.index());
    assert_eq!(second.version(), first.version() + 1);
}

#[test]
fn resuming_a_recycled_handle_is_a_no_op() {
    init_tracing();
    let mut sched = Scheduler::new();
    let mut ctx = Ctx::default();

    let stale = sched.schedule(log("first"), None);
    sched.tick(&mut ctx);

    // Occupies the recycled slot and waits.
    let live = sched.schedule(
        Box::new(|_, _, ctx: &mut Ctx| {
            ctx.log.push("live".to_string());
            Step::Suspend
        }),
        None,
    );
    sched.tick(&mut ctx);
    assert_eq!(live.index(), stale.index());

    sched.resume(stale, Some(log("stale")));
    sched.tick(&mut ctx);

    assert_eq!(ctx.log, vec!["first", "live"]);
    assert!(sched.is_live(live));
    assert_eq!(sched.is_finished(live), Some(false));
    assert_eq!(sched.is_finished(stale), None);
}

#[test]
fn parent_finishes_only_after_both_children() {
    init_tracing();
    let mut sched = Scheduler::new();
    let mut ctx = Ctx::default();

    let parent = sched.schedule(
        Box::new(|sched: &mut Scheduler<Ctx>, me, _: &mut Ctx| {
            sched.schedule(suspending_child(), Some(me));
            sched.schedule(suspending_child(), Some(me));
            Step::Done
        }),
        None,
    );
    sched.tick(&mut ctx);
    assert_eq!(ctx.children.len(), 2);
    let (first, second) = (ctx.children[0], ctx.children[1]);

    // Second child first.
    sched.resume(second, None);
    sched.tick(&mut ctx);
    assert_eq!(sched.is_finished(second), Some(true));
    assert_eq!(sched.is_finished(parent), Some(false));

    sched.resume(first, None);
    sched.tick(&mut ctx);

    // The parent was a root: it and its subtree are gone.
    assert!(!sched.is_live(parent));
    assert!(!sched.is_live(first));
    assert!(!sched.is_live(second));
    assert_eq!(sched.live_count(), 0);
}

#[test]
fn continuation_waits_for_children() {
    init_tracing();
    let mut sched = Scheduler::new();
    let mut ctx = Ctx::default();

    sched.schedule(
        Box::new(|sched: &mut Scheduler<Ctx>, me, _: &mut Ctx| {
            sched.schedule(suspending_child(), Some(me));
            Step::Continue(log("parent continued"))
        }),
        None,
    );
    sched.tick(&mut ctx);
    assert!(ctx.log.is_empty());

    let child = ctx.children[0];
    sched.resume(child, None);
    sched.tick(&mut ctx);

    assert_eq!(ctx.log, vec!["parent continued"]);
    assert_eq!(sched.live_count(), 0);
}

#[test]
fn resume_replaces_the_continuation() {
    let mut sched = Scheduler::new();
    let mut ctx = Ctx::default();

    let node = sched.schedule(Box::new(|_, _, _: &mut Ctx| Step::Suspend), None);
    sched.tick(&mut ctx);
    assert!(sched.is_live(node));

    sched.resume(node, Some(log("woken")));
    sched.tick(&mut ctx);

    assert_eq!(ctx.log, vec!["woken"]);
    assert!(!sched.is_live(node));
}

#[test]
fn reaping_removes_finished_children_of_a_live_parent() {
    let mut sched = Scheduler::new();
    let mut ctx = Ctx::default();

    let parent = sched.schedule(
        Box::new(|sched: &mut Scheduler<Ctx>, me, _: &mut Ctx| {
            sched.schedule(log("child"), Some(me));
            Step::Continue(Box::new(|_, _, _: &mut Ctx| Step::Suspend))
        }),
        None,
    );
    sched.tick(&mut ctx);

    assert_eq!(ctx.log, vec!["child"]);
    assert_eq!(sched.live_count(), 2);

    sched.reap_finished_children(parent);
    assert_eq!(sched.live_count(), 1);
    assert!(sched.is_live(parent));
}
