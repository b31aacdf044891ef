//! Event kinds and the callback registry.
//!
//! Every event kind is declared once in [`for_each_event!`]. That table
//! generates the typed [`Event`] marker structs, the [`EventKind`] enum and
//! the [`CallbackRegistry`] slots here, and the C ABI / JNI exports in
//! `runtime::callbacks`.
//!
//! Arguments and results are primitives only. A kind with no handler
//! dispatches to its `DEFAULT`.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

/// Invoke `$m!` with the full event table.
///
/// Row layout:
/// `Kind, slot, register_fn, dispatch_fn, JniExport: fn(args) -> Output = default;`
macro_rules! for_each_event {
    ($m:ident) => {
        $m! {
            BlockBreak, block_break, register_block_break_handler, dispatch_block_break,
                Java_com_redstone_DartBridge_onBlockBreak:
                fn(x: i32, y: i32, z: i32, player_id: i64) -> i32 = 1;
            BlockInteract, block_interact, register_block_interact_handler, dispatch_block_interact,
                Java_com_redstone_DartBridge_onBlockInteract:
                fn(x: i32, y: i32, z: i32, player_id: i64, hand: i32) -> i32 = 1;
            Tick, tick, register_tick_handler, dispatch_tick,
                Java_com_redstone_DartBridge_onTick:
                fn(tick: i64) -> () = ();

            ProxyBlockBreak, proxy_block_break, register_proxy_block_break_handler, dispatch_proxy_block_break,
                Java_com_redstone_DartBridge_onProxyBlockBreak:
                fn(handler_id: i64, world_id: i64, x: i32, y: i32, z: i32, player_id: i64) -> bool = true;
            ProxyBlockUse, proxy_block_use, register_proxy_block_use_handler, dispatch_proxy_block_use,
                Java_com_redstone_DartBridge_onProxyBlockUse:
                fn(handler_id: i64, world_id: i64, x: i32, y: i32, z: i32, player_id: i64, hand: i32) -> i32 = 3;
            ProxyBlockSteppedOn, proxy_block_stepped_on, register_proxy_block_stepped_on_handler,
                dispatch_proxy_block_stepped_on, Java_com_redstone_DartBridge_onProxyBlockSteppedOn:
                fn(handler_id: i64, world_id: i64, x: i32, y: i32, z: i32, entity_id: i32) -> () = ();
            ProxyBlockFallenUpon, proxy_block_fallen_upon, register_proxy_block_fallen_upon_handler,
                dispatch_proxy_block_fallen_upon, Java_com_redstone_DartBridge_onProxyBlockFallenUpon:
                fn(handler_id: i64, world_id: i64, x: i32, y: i32, z: i32, entity_id: i32, fall_distance: f32) -> () = ();
            ProxyBlockRandomTick, proxy_block_random_tick, register_proxy_block_random_tick_handler,
                dispatch_proxy_block_random_tick, Java_com_redstone_DartBridge_onProxyBlockRandomTick:
                fn(handler_id: i64, world_id: i64, x: i32, y: i32, z: i32) -> () = ();
            ProxyBlockPlaced, proxy_block_placed, register_proxy_block_placed_handler,
                dispatch_proxy_block_placed, Java_com_redstone_DartBridge_onProxyBlockPlaced:
                fn(handler_id: i64, world_id: i64, x: i32, y: i32, z: i32, player_id: i64) -> () = ();
            ProxyBlockRemoved, proxy_block_removed, register_proxy_block_removed_handler,
                dispatch_proxy_block_removed, Java_com_redstone_DartBridge_onProxyBlockRemoved:
                fn(handler_id: i64, world_id: i64, x: i32, y: i32, z: i32) -> () = ();
            ProxyBlockNeighborChanged, proxy_block_neighbor_changed, register_proxy_block_neighbor_changed_handler,
                dispatch_proxy_block_neighbor_changed, Java_com_redstone_DartBridge_onProxyBlockNeighborChanged:
                fn(handler_id: i64, world_id: i64, x: i32, y: i32, z: i32, neighbor_x: i32, neighbor_y: i32, neighbor_z: i32) -> () = ();
            ProxyBlockEntityInside, proxy_block_entity_inside, register_proxy_block_entity_inside_handler,
                dispatch_proxy_block_entity_inside, Java_com_redstone_DartBridge_onProxyBlockEntityInside:
                fn(handler_id: i64, world_id: i64, x: i32, y: i32, z: i32, entity_id: i32) -> () = ();

            BlockEntityTick, block_entity_tick, register_block_entity_tick_handler, dispatch_block_entity_tick,
                Java_com_redstone_DartBridge_onBlockEntityTick:
                fn(handler_id: i32, block_pos: i64) -> () = ();
            BlockEntityGetDataSlot, block_entity_get_data_slot, register_block_entity_get_data_slot_handler,
                dispatch_block_entity_get_data_slot, Java_com_redstone_DartBridge_getBlockEntityDataSlot:
                fn(handler_id: i32, block_pos: i64, index: i32) -> i32 = 0;
            BlockEntitySetDataSlot, block_entity_set_data_slot, register_block_entity_set_data_slot_handler,
                dispatch_block_entity_set_data_slot, Java_com_redstone_DartBridge_setBlockEntityDataSlot:
                fn(handler_id: i32, block_pos: i64, index: i32, value: i32) -> () = ();
            BlockEntityRemoved, block_entity_removed, register_block_entity_removed_handler,
                dispatch_block_entity_removed, Java_com_redstone_DartBridge_onBlockEntityRemoved:
                fn(handler_id: i32, block_pos: i64) -> () = ();

            PlayerJoin, player_join, register_player_join_handler, dispatch_player_join,
                Java_com_redstone_DartBridge_onPlayerJoin:
                fn(player_id: i32) -> () = ();
            PlayerLeave, player_leave, register_player_leave_handler, dispatch_player_leave,
                Java_com_redstone_DartBridge_onPlayerLeave:
                fn(player_id: i32) -> () = ();
            PlayerRespawn, player_respawn, register_player_respawn_handler, dispatch_player_respawn,
                Java_com_redstone_DartBridge_onPlayerRespawn:
                fn(player_id: i32, end_conquered: bool) -> () = ();
            PlayerAttackEntity, player_attack_entity, register_player_attack_entity_handler,
                dispatch_player_attack_entity, Java_com_redstone_DartBridge_onPlayerAttackEntity:
                fn(player_id: i32, target_id: i32) -> bool = true;
            PlayerPickupItem, player_pickup_item, register_player_pickup_item_handler,
                dispatch_player_pickup_item, Java_com_redstone_DartBridge_onPlayerPickupItem:
                fn(player_id: i32, item_entity_id: i32) -> bool = true;

            ServerStarting, server_starting, register_server_starting_handler, dispatch_server_starting,
                Java_com_redstone_DartBridge_onServerStarting:
                fn() -> () = ();
            ServerStarted, server_started, register_server_started_handler, dispatch_server_started,
                Java_com_redstone_DartBridge_onServerStarted:
                fn() -> () = ();
            ServerStopping, server_stopping, register_server_stopping_handler, dispatch_server_stopping,
                Java_com_redstone_DartBridge_onServerStopping:
                fn() -> () = ();
            RegistryReady, registry_ready, register_registry_ready_handler, dispatch_registry_ready,
                Java_com_redstone_DartBridge_signalRegistryReady:
                fn() -> () = ();

            ScreenInit, screen_init, register_screen_init_handler, dispatch_screen_init,
                Java_com_redstone_DartBridge_onScreenInit:
                fn(screen_id: i64, width: i32, height: i32) -> () = ();
            ScreenTick, screen_tick, register_screen_tick_handler, dispatch_screen_tick,
                Java_com_redstone_DartBridge_onScreenTick:
                fn(screen_id: i64) -> () = ();
            ScreenRender, screen_render, register_screen_render_handler, dispatch_screen_render,
                Java_com_redstone_DartBridge_onScreenRender:
                fn(screen_id: i64, mouse_x: i32, mouse_y: i32, partial_tick: f32) -> () = ();
            ScreenClose, screen_close, register_screen_close_handler, dispatch_screen_close,
                Java_com_redstone_DartBridge_onScreenClose:
                fn(screen_id: i64) -> () = ();
            ScreenKeyPressed, screen_key_pressed, register_screen_key_pressed_handler, dispatch_screen_key_pressed,
                Java_com_redstone_DartBridge_onScreenKeyPressed:
                fn(screen_id: i64, key_code: i32, scan_code: i32, modifiers: i32) -> bool = false;
            ScreenKeyReleased, screen_key_released, register_screen_key_released_handler,
                dispatch_screen_key_released, Java_com_redstone_DartBridge_onScreenKeyReleased:
                fn(screen_id: i64, key_code: i32, scan_code: i32, modifiers: i32) -> bool = false;
            ScreenCharTyped, screen_char_typed, register_screen_char_typed_handler, dispatch_screen_char_typed,
                Java_com_redstone_DartBridge_onScreenCharTyped:
                fn(screen_id: i64, code_point: i32, modifiers: i32) -> bool = false;
            ScreenMouseClicked, screen_mouse_clicked, register_screen_mouse_clicked_handler,
                dispatch_screen_mouse_clicked, Java_com_redstone_DartBridge_onScreenMouseClicked:
                fn(screen_id: i64, mouse_x: f64, mouse_y: f64, button: i32) -> bool = false;
            ScreenMouseReleased, screen_mouse_released, register_screen_mouse_released_handler,
                dispatch_screen_mouse_released, Java_com_redstone_DartBridge_onScreenMouseReleased:
                fn(screen_id: i64, mouse_x: f64, mouse_y: f64, button: i32) -> bool = false;
            ScreenMouseDragged, screen_mouse_dragged, register_screen_mouse_dragged_handler,
                dispatch_screen_mouse_dragged, Java_com_redstone_DartBridge_onScreenMouseDragged:
                fn(screen_id: i64, mouse_x: f64, mouse_y: f64, button: i32, drag_x: f64, drag_y: f64) -> bool = false;
            ScreenMouseScrolled, screen_mouse_scrolled, register_screen_mouse_scrolled_handler,
                dispatch_screen_mouse_scrolled, Java_com_redstone_DartBridge_onScreenMouseScrolled:
                fn(screen_id: i64, mouse_x: f64, mouse_y: f64, delta_x: f64, delta_y: f64) -> bool = false;
            WidgetPressed, widget_pressed, register_widget_pressed_handler, dispatch_widget_pressed,
                Java_com_redstone_DartBridge_onWidgetPressed:
                fn(screen_id: i64, widget_id: i64) -> () = ();

            ContainerScreenInit, container_screen_init, register_container_screen_init_handler,
                dispatch_container_screen_init, Java_com_redstone_DartBridge_onContainerScreenInit:
                fn(screen_id: i64, width: i32, height: i32, left_pos: i32, top_pos: i32, image_width: i32, image_height: i32) -> () = ();
            ContainerScreenRenderBg, container_screen_render_bg, register_container_screen_render_bg_handler,
                dispatch_container_screen_render_bg, Java_com_redstone_DartBridge_onContainerScreenRenderBg:
                fn(screen_id: i64, mouse_x: i32, mouse_y: i32, partial_tick: f32, left_pos: i32, top_pos: i32) -> () = ();
            ContainerScreenClose, container_screen_close, register_container_screen_close_handler,
                dispatch_container_screen_close, Java_com_redstone_DartBridge_onContainerScreenClose:
                fn(screen_id: i64) -> () = ();
            ContainerSlotClick, container_slot_click, register_container_slot_click_handler,
                dispatch_container_slot_click, Java_com_redstone_DartBridge_onContainerSlotClick:
                fn(menu_id: i64, slot_index: i32, button: i32, click_type: i32) -> i32 = 0;
            ContainerMayPickup, container_may_pickup, register_container_may_pickup_handler,
                dispatch_container_may_pickup, Java_com_redstone_DartBridge_onContainerMayPickup:
                fn(menu_id: i64, slot_index: i32) -> bool = true;

            ProxyEntitySpawn, proxy_entity_spawn, register_proxy_entity_spawn_handler, dispatch_proxy_entity_spawn,
                Java_com_redstone_DartBridge_onProxyEntitySpawn:
                fn(handler_id: i64, entity_id: i32, world_id: i64) -> () = ();
            ProxyEntityTick, proxy_entity_tick, register_proxy_entity_tick_handler, dispatch_proxy_entity_tick,
                Java_com_redstone_DartBridge_onProxyEntityTick:
                fn(handler_id: i64, entity_id: i32) -> () = ();
            ProxyEntityAttack, proxy_entity_attack, register_proxy_entity_attack_handler,
                dispatch_proxy_entity_attack, Java_com_redstone_DartBridge_onProxyEntityAttack:
                fn(handler_id: i64, entity_id: i32, target_id: i32) -> () = ();
            ProxyEntityTarget, proxy_entity_target, register_proxy_entity_target_handler,
                dispatch_proxy_entity_target, Java_com_redstone_DartBridge_onProxyEntityTarget:
                fn(handler_id: i64, entity_id: i32, target_id: i32) -> () = ();
        }
    };
}

pub(crate) use for_each_event;

/// A typed event kind.
pub trait Event: Sized + 'static {
    const KIND: EventKind;
    /// Result when no handler is registered or the bridge is not running.
    const DEFAULT: Self::Output;
    type Args: 'static;
    type Output: Copy + 'static;
    /// The C function pointer type the VM side registers.
    type Foreign: Copy + Send + Sync + 'static;

    fn slot(registry: &CallbackRegistry) -> &Slot<Self>;

    fn from_foreign(f: Self::Foreign) -> Handler<Self>;
}

pub type Handler<E> = Arc<dyn Fn(<E as Event>::Args) -> <E as Event>::Output + Send + Sync>;

/// One registration cell: unset, or exactly one handler.
pub struct Slot<E: Event> {
    handler: RwLock<Option<Handler<E>>>,
}

impl<E: Event> Slot<E> {
    fn new() -> Self {
        Self {
            handler: RwLock::new(None),
        }
    }

    fn replace(&self, handler: Option<Handler<E>>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    fn get(&self) -> Option<Handler<E>> {
        self.handler.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn is_set(&self) -> bool {
        self.handler.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

macro_rules! define_events {
    ($(
        $kind:ident, $slot:ident, $register:ident, $dispatch:ident, $jni:ident:
            fn($($arg:ident: $ty:ty),*) -> $out:ty = $default:expr;
    )*) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $($kind,)*
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$kind,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(EventKind::$kind => stringify!($slot),)*
                }
            }
        }

        /// Marker types, one per event kind.
        pub mod kinds {
            use super::*;

            $(
                #[derive(Debug)]
                pub struct $kind;

                impl Event for $kind {
                    const KIND: EventKind = EventKind::$kind;
                    const DEFAULT: $out = $default;
                    type Args = ($($ty,)*);
                    type Output = $out;
                    type Foreign = extern "C" fn($($ty),*) -> $out;

                    fn slot(registry: &CallbackRegistry) -> &Slot<Self> {
                        &registry.$slot
                    }

                    fn from_foreign(f: Self::Foreign) -> Handler<Self> {
                        Arc::new(move |($($arg,)*): Self::Args| f($($arg),*))
                    }
                }
            )*
        }

        pub struct CallbackRegistry {
            $($slot: Slot<kinds::$kind>,)*
        }

        impl CallbackRegistry {
            pub fn new() -> Self {
                Self {
                    $($slot: Slot::new(),)*
                }
            }

            /// Reset every slot to unregistered.
            pub fn clear(&self) {
                $(self.$slot.replace(None);)*
                debug!("callback registry cleared");
            }

            pub fn is_registered(&self, kind: EventKind) -> bool {
                match kind {
                    $(EventKind::$kind => self.$slot.is_set(),)*
                }
            }

            pub fn registered(&self) -> usize {
                EventKind::ALL.iter().filter(|&&kind| self.is_registered(kind)).count()
            }
        }
    };
}

for_each_event!(define_events);

impl CallbackRegistry {
    /// Install `handler` for `E`, replacing any previous one.
    pub fn set<E: Event>(&self, handler: impl Fn(E::Args) -> E::Output + Send + Sync + 'static) {
        E::slot(self).replace(Some(Arc::new(handler)));
    }

    /// Install a VM-side function pointer; `None` unregisters.
    pub fn set_foreign<E: Event>(&self, f: Option<E::Foreign>) {
        E::slot(self).replace(f.map(E::from_foreign));
        debug!(event = E::KIND.name(), registered = f.is_some(), "handler registration");
    }

    pub fn unset<E: Event>(&self) {
        E::slot(self).replace(None);
    }

    /// Run the handler for `E` inline, or return `E::DEFAULT`.
    ///
    /// The handler is cloned out of its slot first, so it may re-register or
    /// dispatch again without deadlocking.
    pub fn dispatch<E: Event>(&self, args: E::Args) -> E::Output {
        match E::slot(self).get() {
            Some(handler) => handler(args),
            None => E::DEFAULT,
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventKind {
    /// Kinds after which pending microtasks are drained.
    pub fn drains_microtasks(self) -> bool {
        matches!(self, EventKind::Tick | EventKind::ServerStarted)
    }
}
