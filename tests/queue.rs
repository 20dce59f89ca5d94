use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod test_common;

#[test]
fn submit_waits_for_queue_lock() {
    let env = match test_common::make_env() {
        Some(env) => env,
        None => return,
    };
    let queue = env.get_queue();
    let submitted = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let guard = queue.lock_queue();

        let handle = scope.spawn(|| {
            unsafe { queue.submit(&[], None) }.unwrap();
            submitted.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(100));
        assert!(!submitted.load(Ordering::SeqCst));

        drop(guard);
        handle.join().unwrap();
    });

    assert!(submitted.load(Ordering::SeqCst));
    unsafe { queue.wait_idle() }.unwrap();
}
