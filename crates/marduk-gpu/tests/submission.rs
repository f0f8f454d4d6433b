use std::sync::Arc;
use std::time::Duration;

use marduk_gpu::logging::{LoggingConfig, init_logging};
use marduk_gpu::native::soft::{SoftDevice, SoftEvent};
use marduk_gpu::native::{
    ALL_SUBRESOURCES, Barrier, NativeCommand, QueueType, ResourceId, ResourceStates,
};
use marduk_gpu::{Device, DeviceInit};

fn setup() -> (SoftDevice, Device) {
    init_logging(LoggingConfig {
        is_test: true,
        ..LoggingConfig::default()
    });
    let soft = SoftDevice::new();
    let device = Device::new(Arc::new(soft.clone()), DeviceInit::default()).unwrap();
    (soft, device)
}

/// Transitions of `resource` in the order the GPU executed them.
fn transitions_of(soft: &SoftDevice, resource: ResourceId) -> Vec<(ResourceStates, ResourceStates)> {
    soft.events()
        .into_iter()
        .filter_map(|event| match event {
            SoftEvent::Executed {
                command: NativeCommand::ResourceBarriers(barriers),
                ..
            } => Some(barriers),
            _ => None,
        })
        .flatten()
        .filter_map(|barrier| match barrier {
            Barrier::Transition {
                resource: r,
                before,
                after,
                ..
            } if r == resource => Some((before, after)),
            _ => None,
        })
        .collect()
}

#[test]
fn first_use_is_fixed_up_before_the_list_body() {
    let (soft, device) = setup();
    let r = soft.create_buffer(64);
    device.register_resource(r, ResourceStates::COPY_DEST);

    let queue = device.get_command_queue(QueueType::Direct);
    let mut a = queue.get_command_list();
    a.transition_barrier(r, ResourceStates::PIXEL_SHADER_RESOURCE, ALL_SUBRESOURCES, false);
    a.draw(3, 1, 0, 0).unwrap();
    let b = queue.get_command_list();

    soft.clear_events();
    queue.execute_command_lists(vec![a, b]);

    let direct = soft.executed_commands(QueueType::Direct);
    let fix_up = direct
        .iter()
        .position(|c| matches!(c, NativeCommand::ResourceBarriers(_)))
        .expect("fix-up barrier executed");
    let draw = direct
        .iter()
        .position(|c| matches!(c, NativeCommand::Draw { .. }))
        .expect("draw executed");
    assert!(fix_up < draw);
    assert_eq!(
        transitions_of(&soft, r),
        vec![(ResourceStates::COPY_DEST, ResourceStates::PIXEL_SHADER_RESOURCE)]
    );
}

#[test]
fn lists_recorded_concurrently_resolve_in_submission_order() {
    let (soft, device) = setup();
    let r = soft.create_buffer(16);
    device.register_resource(r, ResourceStates::COMMON);

    let copy = device.get_command_queue(QueueType::Copy);
    let direct = device.get_command_queue(QueueType::Direct);

    // Both lists are recorded before either is submitted.
    let mut upload = copy.get_command_list();
    upload.copy_buffer_pod(r, &[1u32, 2, 3, 4]).unwrap();
    let mut shade = direct.get_command_list();
    shade.transition_barrier(r, ResourceStates::PIXEL_SHADER_RESOURCE, ALL_SUBRESOURCES, false);

    let copied = copy.execute(upload);
    direct.wait(copy);
    direct.execute(shade);
    device.flush_all_queues();

    assert!(copy.is_fence_complete(copied));
    assert_eq!(
        transitions_of(&soft, r),
        vec![
            (ResourceStates::COMMON, ResourceStates::COPY_DEST),
            (ResourceStates::COPY_DEST, ResourceStates::PIXEL_SHADER_RESOURCE),
        ]
    );
    assert_eq!(
        soft.buffer_contents(r),
        bytemuck::cast_slice::<u32, u8>(&[1, 2, 3, 4]).to_vec()
    );
}

#[test]
fn concurrent_submissions_keep_a_consistent_state_chain() {
    let (soft, device) = setup();
    let r = soft.create_buffer(16);
    device.register_resource(r, ResourceStates::COMMON);

    let plans = [
        (
            QueueType::Direct,
            ResourceStates::PIXEL_SHADER_RESOURCE,
            ResourceStates::RENDER_TARGET,
        ),
        (
            QueueType::Compute,
            ResourceStates::UNORDERED_ACCESS,
            ResourceStates::NON_PIXEL_SHADER_RESOURCE,
        ),
        (
            QueueType::Copy,
            ResourceStates::COPY_DEST,
            ResourceStates::COPY_SOURCE,
        ),
    ];

    std::thread::scope(|scope| {
        for (queue_type, first, second) in plans {
            let device = &device;
            scope.spawn(move || {
                let queue = device.get_command_queue(queue_type);
                for _ in 0..25 {
                    let mut list = queue.get_command_list();
                    list.transition_barrier(r, first, ALL_SUBRESOURCES, false);
                    list.transition_barrier(r, second, ALL_SUBRESOURCES, true);
                    queue.execute(list);
                }
            });
        }
    });
    device.flush_all_queues();

    let chain = transitions_of(&soft, r);
    assert!(chain.len() >= 75, "only {} transitions executed", chain.len());

    let mut current = ResourceStates::COMMON;
    for (before, after) in chain {
        assert_eq!(before, current, "transition out of a state the resource was not in");
        current = after;
    }
    assert_eq!(
        device.global_states().resource_state(r).map(|s| s.state),
        Some(current)
    );
}

#[test]
fn lists_are_recycled_after_flush() {
    let (_soft, device) = setup();
    let queue = device.get_command_queue(QueueType::Compute);

    for _ in 0..3 {
        let mut list = queue.get_command_list();
        list.dispatch(4, 4, 1).unwrap();
        let value = queue.execute(list);
        assert!(queue.wait_for_frame(value));
    }
    queue.flush();

    assert_eq!(queue.in_flight_count(), 0);
    // Each execute retires a primary and a companion list.
    assert!(queue.available_count() >= 2);
}

#[test]
fn bounded_wait_expires_while_the_gpu_is_busy() {
    init_logging(LoggingConfig {
        is_test: true,
        ..LoggingConfig::default()
    });
    let soft = SoftDevice::with_manual_completion();
    let device = Device::new(Arc::new(soft.clone()), DeviceInit::default()).unwrap();
    let queue = device.get_command_queue(QueueType::Direct);

    let value = queue.execute(queue.get_command_list());
    assert!(!queue.wait_for_fence_value_timeout(value, Duration::from_millis(5)));

    soft.complete_all();
    queue.wait_for_fence_value(value);
    assert!(queue.is_fence_complete(value));
}
