use std::thread;

use pretty_assertions::assert_eq;

use crate::interrupt::{irq_vector, Exception, ExitHandle, IrqHandle};

#[test]
fn exception_vectors_and_error_codes() {
    assert_eq!(0, Exception::DIV0.vector());
    assert_eq!(6, Exception::UD.vector());
    assert_eq!(13, Exception::GP(0x10).vector());
    assert_eq!(Some(0x10), Exception::GP(0x10).error_code());
    assert_eq!(Some(0), Exception::DF.error_code());
    assert_eq!(None, Exception::DIV0.error_code());
    assert_eq!("#GP(0010)", Exception::GP(0x10).to_string());
    assert_eq!("#DE", Exception::DIV0.to_string());
}

#[test]
fn traps_and_faults() {
    assert!(Exception::BP.is_trap());
    assert!(Exception::OF.is_trap());
    assert!(!Exception::DIV0.is_trap());
    assert!(!Exception::GP(0).is_trap());
}

#[test]
fn lowest_irq_line_wins() {
    let irq = IrqHandle::new();
    assert_eq!(None, irq.take_highest());

    irq.raise(4);
    irq.raise(1);
    irq.raise(12);
    assert!(irq.is_pending());
    assert_eq!(Some(1), irq.take_highest());
    assert_eq!(Some(4), irq.take_highest());

    irq.lower(12);
    assert_eq!(None, irq.take_highest());
    assert!(!irq.is_pending());
}

#[test]
fn irq_can_be_raised_from_another_thread() {
    let irq = IrqHandle::new();
    let remote = irq.clone();
    thread::spawn(move || remote.raise(3)).join().unwrap();
    assert_eq!(Some(3), irq.take_highest());
}

#[test]
fn maps_irq_lines_to_vectors() {
    assert_eq!(0x08, irq_vector(0, 0x08, 0x70));
    assert_eq!(0x0F, irq_vector(7, 0x08, 0x70));
    assert_eq!(0x70, irq_vector(8, 0x08, 0x70));
    assert_eq!(0x77, irq_vector(15, 0x08, 0x70));
}

#[test]
fn exit_handle_is_shared() {
    let exit = ExitHandle::new();
    let remote = exit.clone();
    assert!(!exit.is_requested());
    remote.request();
    assert!(exit.is_requested());
    exit.clear();
    assert!(!remote.is_requested());
}
